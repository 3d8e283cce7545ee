/// Elements with a width, measured in JVM slots
///
/// Local variables and operand stack entries of type `long` or `double` take two slots, every
/// other value takes one.
pub trait Width {
    fn width(&self) -> usize;
}

impl<A: Width> Width for [A] {
    fn width(&self) -> usize {
        self.iter().map(|elem| elem.width()).sum()
    }
}

impl<A: Width> Width for Vec<A> {
    fn width(&self) -> usize {
        self.as_slice().width()
    }
}
