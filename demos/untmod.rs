use std::fs::{self, File};
use std::io;
use std::sync::Arc;

use anyhow::*;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use log::*;
use rayon::prelude::*;
use structopt::*;

use tmod::*;

#[derive(Debug, StructOpt)]
#[structopt(name = "untmod", about = "Dumps a .tmod file into a directory")]
struct Opt {
    /// Pass multiple times for additional verbosity (info, debug, trace)
    #[structopt(short, long, parse(from_occurrences))]
    verbosity: usize,

    /// Prints the files in the container instead of extracting them.
    #[structopt(short = "n", long)]
    dry_run: bool,

    /// Reads entries concurrently, each through its own file handle.
    #[structopt(short, long)]
    parallel: bool,

    #[structopt(name("TMOD file"))]
    tmod_path: Utf8PathBuf,

    #[structopt(name("destination"))]
    destination: Utf8PathBuf,
}

fn main() -> Result<()> {
    let args = Opt::from_args();

    let mut errlog = stderrlog::new();
    errlog.verbosity(args.verbosity + 1);
    errlog.init()?;

    let tmod = TmodFile::new(args.tmod_path.clone());
    let mut guard = tmod
        .open()
        .with_context(|| format!("Couldn't open {}", args.tmod_path))?;
    info!(
        "{} v{} (built with tModLoader {})",
        tmod.name().unwrap_or_default(),
        tmod.version().unwrap_or_default(),
        tmod.tmodloader_version().unwrap_or_default()
    );
    if tmod.has_file(properties::INFO_ENTRY) {
        let properties =
            BuildProperties::read_from(&tmod).context("Couldn't read build properties")?;
        print_properties(&properties);
    }

    let entries = tmod.entries();
    if args.dry_run {
        for entry in &entries {
            println!("{}", entry.name());
        }
    } else if args.parallel {
        entries
            .par_iter()
            .try_for_each(|entry| extract(&tmod, entry, &args.destination, true))?;
    } else {
        for entry in &entries {
            extract(&tmod, entry, &args.destination, false)?;
        }
    }

    guard.close().context("Couldn't close container")?;
    Ok(())
}

fn print_properties(properties: &BuildProperties) {
    if !properties.display_name.is_empty() {
        info!("Display name: {}", properties.display_name);
    }
    if !properties.author.is_empty() {
        info!("Author: {}", properties.author);
    }
    info!("Side: {:?}", properties.side);
    for reference in &properties.mod_references {
        info!("Depends on {}", reference);
    }
    for reference in &properties.weak_references {
        info!("Weakly depends on {}", reference);
    }
}

/// Refuses names that would land outside the destination.
fn destination_for(root: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
    let name = Utf8Path::new(name);
    if !name
        .components()
        .all(|c| matches!(c, Utf8Component::Normal(_) | Utf8Component::CurDir))
    {
        bail!("Refusing to extract {} outside {}", name, root);
    }
    Ok(root.join(name))
}

fn extract(
    tmod: &TmodFile,
    entry: &Arc<TmodFileEntry>,
    root: &Utf8Path,
    independent: bool,
) -> Result<()> {
    let path = destination_for(root, entry.name())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Couldn't create directory {}", parent))?;
    }
    debug!("{} -> {}", entry.name(), path);

    let mut reader = tmod
        .open_entry(entry, independent)
        .with_context(|| format!("Couldn't read {}", entry.name()))?;
    let mut sink =
        File::create(&path).with_context(|| format!("Couldn't create file {}", path))?;
    io::copy(&mut reader, &mut sink).with_context(|| format!("Couldn't extract {}", entry.name()))?;
    reader.close()?;
    Ok(())
}
