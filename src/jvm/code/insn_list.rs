use super::Insn;

/// Stable handle to a node of an [`InsnList`]
///
/// Handles stay valid when other nodes are inserted, moved, or removed. A removed node keeps its
/// handle (and its instruction) but is no longer part of the sequence.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InsnId(usize);

#[derive(Clone, Debug)]
struct Node {
    insn: Insn,
    prev: Option<InsnId>,
    next: Option<InsnId>,
    attached: bool,
}

/// Doubly-linked list of instructions, backed by an arena
///
/// The rewriting passes need to insert instructions around a node and move nodes to other
/// positions while holding on to handles gathered by an earlier analysis. A `Vec` of
/// instructions can't give that, so nodes are allocated once and only their links change.
#[derive(Clone, Debug, Default)]
pub struct InsnList {
    nodes: Vec<Node>,
    first: Option<InsnId>,
    last: Option<InsnId>,
    len: usize,
}

impl InsnList {
    pub fn new() -> InsnList {
        InsnList::default()
    }

    /// Number of nodes currently in the list
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn first(&self) -> Option<InsnId> {
        self.first
    }

    pub fn last(&self) -> Option<InsnId> {
        self.last
    }

    pub fn get(&self, id: InsnId) -> &Insn {
        &self.nodes[id.0].insn
    }

    pub fn get_mut(&mut self, id: InsnId) -> &mut Insn {
        &mut self.nodes[id.0].insn
    }

    pub fn next(&self, id: InsnId) -> Option<InsnId> {
        self.nodes[id.0].next
    }

    pub fn prev(&self, id: InsnId) -> Option<InsnId> {
        self.nodes[id.0].prev
    }

    pub fn is_attached(&self, id: InsnId) -> bool {
        self.nodes[id.0].attached
    }

    fn allocate(&mut self, insn: Insn) -> InsnId {
        let id = InsnId(self.nodes.len());
        self.nodes.push(Node {
            insn,
            prev: None,
            next: None,
            attached: false,
        });
        id
    }

    /// Link a detached node between `prev` and `next`
    fn link(&mut self, id: InsnId, prev: Option<InsnId>, next: Option<InsnId>) {
        debug_assert!(!self.nodes[id.0].attached, "node {:?} is already linked", id);
        {
            let node = &mut self.nodes[id.0];
            node.prev = prev;
            node.next = next;
            node.attached = true;
        }
        match prev {
            Some(prev) => self.nodes[prev.0].next = Some(id),
            None => self.first = Some(id),
        }
        match next {
            Some(next) => self.nodes[next.0].prev = Some(id),
            None => self.last = Some(id),
        }
        self.len += 1;
    }

    pub fn push_back(&mut self, insn: impl Into<Insn>) -> InsnId {
        let id = self.allocate(insn.into());
        self.link(id, self.last, None);
        id
    }

    /// Insert a new node just before `anchor`
    pub fn insert_before(&mut self, anchor: InsnId, insn: impl Into<Insn>) -> InsnId {
        let id = self.allocate(insn.into());
        self.link(id, self.prev(anchor), Some(anchor));
        id
    }

    /// Insert a new node just after `anchor`
    pub fn insert_after(&mut self, anchor: InsnId, insn: impl Into<Insn>) -> InsnId {
        let id = self.allocate(insn.into());
        self.link(id, Some(anchor), self.next(anchor));
        id
    }

    /// Detach a node from the list (its handle remains usable for [`InsnList::get`])
    pub fn remove(&mut self, id: InsnId) {
        if !self.nodes[id.0].attached {
            return;
        }
        let Node { prev, next, .. } = self.nodes[id.0];
        match prev {
            Some(prev) => self.nodes[prev.0].next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => self.nodes[next.0].prev = prev,
            None => self.last = prev,
        }
        let node = &mut self.nodes[id.0];
        node.prev = None;
        node.next = None;
        node.attached = false;
        self.len -= 1;
    }

    /// Move an existing node so that it sits just before `anchor`
    pub fn move_before(&mut self, anchor: InsnId, id: InsnId) {
        if anchor == id {
            return;
        }
        self.remove(id);
        self.link(id, self.prev(anchor), Some(anchor));
    }

    /// Iterate over the attached nodes, in order
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.first,
        }
    }

    /// Attached node handles, in order
    pub fn ids(&self) -> Vec<InsnId> {
        self.iter().map(|(id, _)| id).collect()
    }
}

pub struct Iter<'a> {
    list: &'a InsnList,
    cursor: Option<InsnId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (InsnId, &'a Insn);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.list.next(id);
        Some((id, self.list.get(id)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::Instruction;

    fn ops(list: &InsnList) -> Vec<Insn> {
        list.iter().map(|(_, insn)| insn.clone()).collect()
    }

    #[test]
    fn insert_and_move() {
        let mut list = InsnList::new();
        let a = list.push_back(Instruction::IConst0);
        let b = list.push_back(Instruction::IConst1);
        let c = list.push_back(Instruction::IConst2);
        list.insert_before(a, Instruction::Nop);
        list.insert_after(b, Instruction::Pop);
        list.move_before(b, c);

        assert_eq!(
            ops(&list),
            vec![
                Insn::Op(Instruction::Nop),
                Insn::Op(Instruction::IConst0),
                Insn::Op(Instruction::IConst2),
                Insn::Op(Instruction::IConst1),
                Insn::Op(Instruction::Pop),
            ]
        );
        assert_eq!(list.len(), 5);
        assert_eq!(list.last().map(|id| list.get(id).clone()), Some(Insn::Op(Instruction::Pop)));
    }

    #[test]
    fn removed_nodes_keep_their_handle() {
        let mut list = InsnList::new();
        let a = list.push_back(Instruction::IConst0);
        let b = list.push_back(Instruction::Pop);
        list.remove(a);
        list.remove(a);

        assert!(!list.is_attached(a));
        assert_eq!(list.get(a), &Insn::Op(Instruction::IConst0));
        assert_eq!(list.first(), Some(b));
        assert_eq!(list.prev(b), None);
        assert_eq!(list.len(), 1);

        list.move_before(b, a);
        assert_eq!(list.ids(), vec![a, b]);
    }
}
