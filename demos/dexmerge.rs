use dexmerge::{ClassOrder, CollisionPolicy, DexFile, DexMerger, MergeOptions};
use log::info;
use std::env;
use std::error::Error;
use std::path::Path;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} [--keep-first] [--supertypes-first] [--verify-checksums] <out.dex> <input>...", program);
    eprintln!("Inputs are .dex files or apk/jar/zip archives holding classes.dex, classes2.dex, ...");
    std::process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut options = MergeOptions::default();
    let mut paths = vec![];
    for arg in &args[1..] {
        match arg.as_str() {
            "--keep-first" => options.collision_policy = CollisionPolicy::KeepFirst,
            "--supertypes-first" => options.class_order = ClassOrder::SupertypesFirst,
            "--verify-checksums" => options.verify_input_checksums = true,
            flag if flag.starts_with("--") => usage(&args[0]),
            path => paths.push(path),
        }
    }
    if paths.len() < 2 {
        usage(&args[0]);
    }

    match merge(options, paths[0], &paths[1..]) {
        Ok(_) => println!("Wrote merged DEX to {}", paths[0]),
        Err(err) => {
            eprintln!("Failed: {err}");
            std::process::exit(1);
        }
    }
}

fn merge(options: MergeOptions, output: &str, inputs: &[&str]) -> Result<(), Box<dyn Error>> {
    let mut merger = DexMerger::new(options);
    for input in inputs {
        let files = DexFile::all_from_path(Path::new(input))?;
        info!("{}: {} dex file(s)", input, files.len());
        for dex in files {
            merger.add_dex(dex)?;
        }
    }
    let merged = merger.merge()?;
    let stats = &merged.stats;
    println!(
        "{} inputs, {} classes ({} dropped), {} strings, {} types, {} fields, {} methods",
        stats.inputs, stats.classes, stats.classes_dropped, stats.strings, stats.types, stats.fields, stats.methods
    );
    std::fs::write(output, &merged.bytes)?;
    Ok(())
}
