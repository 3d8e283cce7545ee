use stackflow::continuation::{ClassTransformer, Error, MethodRef, Settings};
use stackflow::jvm::class_file::ClassFile;
use stackflow::jvm::class_graph::{ClassGraph, ClassGraphArenas};
use stackflow::*;

use clap::{crate_version, Arg, ArgAction, Command};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every `.class` file under a path (or the path itself, if it is a file)
fn class_files(root: &Path) -> Result<Vec<PathBuf>, jvm::Error> {
    let mut paths = vec![];
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|err| jvm::Error::IoError(err.into()))?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().map_or(false, |ext| ext == "class") {
            paths.push(path.to_owned());
        }
    }
    Ok(paths)
}

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("stackflow")
        .version(crate_version!())
        .about("Prepare JVM class files for stackful continuations")
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write rewritten classes under this directory (default: overwrite inputs)"),
        )
        .arg(
            Arg::new("classpath")
                .long("classpath")
                .value_name("DIR")
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("Directory of classes used to resolve types (may be repeated)"),
        )
        .arg(
            Arg::new("method")
                .long("method")
                .value_name("NAME")
                .action(ArgAction::Append)
                .help("Only rewrite methods with this name (may be repeated)"),
        )
        .arg(
            Arg::new("no-frames")
                .long("no-frames")
                .action(ArgAction::SetTrue)
                .help("Do not emit `StackMapTable` attributes"),
        )
        .arg(
            Arg::new("strict")
                .long("strict")
                .action(ArgAction::SetTrue)
                .help("Fail on allocation idioms that cannot be traced"),
        )
        .arg(
            Arg::new("INPUT")
                .help("Class files, or directories of class files, to rewrite")
                .value_parser(clap::value_parser!(PathBuf))
                .required(true)
                .num_args(1..),
        )
        .get_matches();

    let settings = Settings {
        compute_frames: !matches.get_flag("no-frames"),
        strict_idioms: matches.get_flag("strict"),
    };

    let class_graph_arenas = ClassGraphArenas::new();
    let class_graph = ClassGraph::new(&class_graph_arenas);
    class_graph.insert_java_library_types();

    if let Some(classpath) = matches.get_many::<PathBuf>("classpath") {
        for directory in classpath {
            for path in class_files(directory)? {
                let bytes = fs::read(&path).map_err(jvm::Error::IoError)?;
                class_graph.add_class_file(&ClassFile::parse(&bytes)?)?;
            }
        }
    }

    // Inputs are part of the type universe too
    let mut inputs = vec![];
    for root in matches.get_many::<PathBuf>("INPUT").into_iter().flatten() {
        for path in class_files(root)? {
            log::info!("Reading '{}'", path.display());
            let bytes = fs::read(&path).map_err(jvm::Error::IoError)?;
            let class = ClassFile::parse(&bytes)?;
            class_graph.add_class_file(&class)?;
            inputs.push((path, class));
        }
    }

    let mut transformer = ClassTransformer::new(&class_graph, settings);
    if let Some(names) = matches.get_many::<String>("method") {
        let names: Vec<String> = names.cloned().collect();
        transformer =
            transformer.with_filter(move |method: &MethodRef| names.contains(&method.name));
    }

    let output = matches.get_one::<PathBuf>("output");
    for (path, mut class) in inputs {
        let report = transformer.transform_class(&mut class)?;
        log::info!(
            "Rewrote {} of {} method(s) in '{}'",
            report.rewritten(),
            report.methods.len(),
            report.class
        );
        if report.skipped_idioms() > 0 {
            log::warn!(
                "{} initializer receiver(s) in '{}' could not be traced to an allocation",
                report.skipped_idioms(),
                report.class
            );
        }

        let destination = match output {
            Some(directory) => directory.join(format!("{}.class", report.class)),
            None => path,
        };
        log::info!("Writing '{}'", destination.display());
        class
            .save_to_path(&destination, true)
            .map_err(jvm::Error::IoError)?;
    }

    Ok(())
}
