//! strata: browse a native directory through the virtual file substrate

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use strata::cli::{Args, Command};
use strata::drivers;
use strata::{Category, Isolate, Request};

#[compio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.output.level())
        .with_writer(std::io::stderr)
        .init();

    args.validate()?;

    let iso = Isolate::new(args.isolate.clone());
    drivers::register_builtin(&iso)?;
    let root = iso
        .mount_native(&args.root.root)
        .with_context(|| format!("Failed to mount root '{}'", args.root.root.display()))?;
    iso.set_root(root);

    let result = run(&iso, &args.command).await;

    if args.output.stats {
        eprintln!("{:#?}", iso.stats().snapshot());
    }
    iso.clear_root();
    result
}

async fn run(iso: &Isolate, command: &Command) -> Result<()> {
    let vpath = command.vpath();
    let found = iso.pathfind_root(vpath).await?;

    match command {
        Command::Resolve { .. } => {
            if found.is_resolved() {
                println!("{vpath}: resolved to file {}", found.base());
            } else {
                println!(
                    "{vpath}: unresolved at byte {} ({} bytes remaining, deepest file {})",
                    vpath.len() - found.remaining(),
                    found.remaining(),
                    found.base()
                );
            }
        }
        Command::Ls { .. } => {
            let dir = found
                .resolved()
                .with_context(|| format!("No such file: {vpath}"))?;
            let pending = iso
                .submit(dir.id(), Request::list())
                .with_context(|| format!("Not a directory: {vpath}"))?;
            for entry in pending.await.into_entries() {
                let suffix = if iso.answers(entry.file, Category::Dir) {
                    "/"
                } else {
                    ""
                };
                println!("{}{suffix}", entry.name);
            }
        }
        Command::Cat { .. } => {
            let file = found
                .resolved()
                .with_context(|| format!("No such file: {vpath}"))?;
            let chunk = iso.config().read_max;
            let mut stdout = std::io::stdout().lock();
            let mut offset = 0u64;
            loop {
                let pending = iso
                    .submit(file.id(), Request::read(offset, chunk))
                    .with_context(|| format!("Not readable: {vpath}"))?;
                let data = pending.await.into_data();
                if data.is_empty() {
                    break;
                }
                stdout.write_all(&data)?;
                offset += data.len() as u64;
            }
            stdout.flush()?;
        }
    }
    Ok(())
}
