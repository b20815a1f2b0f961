use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use ka_core::{Compilation, CompileOptions, FsLoader, Limits, collect_sources, compile_source};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Parses and analyses ka source units.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Source files or directories (searched for `*.ka`). Reads stdin when empty.
    paths: Vec<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Directory `using` imports are resolved in (defaults to each file's directory)"
    )]
    include_dir: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Maximum parser and analyzer nesting depth")]
    max_depth: Option<usize>,

    #[arg(long, value_name = "N", help = "Maximum number of expression nodes per unit")]
    max_nodes: Option<usize>,

    #[arg(long, help = "Print the type of every function after analysis")]
    dump_types: bool,

    #[arg(short, long, help = "Log pipeline progress to stderr")]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    execute(cli)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn execute(cli: Cli) -> Result<()> {
    let mut limits = Limits::default();
    if let Some(depth) = cli.max_depth {
        limits.max_depth = depth;
    }
    if let Some(nodes) = cli.max_nodes {
        limits.max_nodes = nodes;
    }
    let options = CompileOptions::default().with_limits(limits);

    if cli.paths.is_empty() {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .context("failed to read source from stdin")?;
        let search_dir = cli.include_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let compilation = compile("main", &source, &search_dir, &options)
            .context("failed to compile <stdin>")?;
        report("<stdin>", &compilation, cli.dump_types);
        return Ok(());
    }

    let files = expand_paths(&cli.paths)?;
    if files.is_empty() {
        bail!("no .ka sources found");
    }
    for file in &files {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read input file {}", file.display()))?;
        let unit = file
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("main");
        let search_dir = match &cli.include_dir {
            Some(dir) => dir.clone(),
            None => file.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        debug!(file = %file.display(), search_dir = %search_dir.display(), "compiling");
        let compilation = compile(unit, &source, &search_dir, &options)
            .with_context(|| format!("failed to compile {}", file.display()))?;
        report(&file.display().to_string(), &compilation, cli.dump_types);
    }
    Ok(())
}

/// Files as given, directories replaced by the sources found under them.
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = collect_sources(path)
                .with_context(|| format!("failed to walk directory {}", path.display()))?;
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn compile(
    unit: &str,
    source: &str,
    search_dir: &Path,
    options: &CompileOptions,
) -> Result<Compilation> {
    let mut loader = FsLoader::new(search_dir);
    Ok(compile_source(unit, source, &mut loader, options)?)
}

fn report(label: &str, compilation: &Compilation, dump_types: bool) {
    println!(
        "ok: {label} ({} functions, {} lifted)",
        compilation.declared_count(),
        compilation.lifted_count()
    );
    if dump_types {
        for function in compilation.summary() {
            let marker = if function.lifted { " (lifted)" } else { "" };
            println!("  {} : {}{marker}", function.name, function.ty);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn analyses_a_file() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("inc.ka");
        fs::write(&input_path, "i32 -> i32 main = \\x (x + 1);").expect("write input");

        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("(1 functions, 0 lifted)"));
    }

    #[test]
    fn reads_stdin_without_paths() {
        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .write_stdin("i32 -> i32 main = \\x (x * 2);")
            .assert()
            .success()
            .stdout(predicate::str::contains("ok: <stdin>"));
    }

    #[test]
    fn reports_type_errors() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("bad.ka");
        fs::write(&input_path, "i32 -> i32 main = \\x (missing x);").expect("write input");

        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .arg(&input_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("unknown name `missing`"));
    }

    #[test]
    fn walks_directories_and_resolves_imports() {
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("src");
        fs::create_dir_all(&nested).expect("create dir");
        fs::write(nested.join("util.ka"), "i32 -> i32 twice = \\x (x + x);").expect("write util");
        fs::write(
            nested.join("app.ka"),
            "using util; i32 -> i32 main = \\x (twice x);",
        )
        .expect("write app");
        fs::write(nested.join("notes.txt"), "not a source").expect("write notes");

        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .arg(dir.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("app.ka (2 functions, 0 lifted)"))
            .stdout(predicate::str::contains("util.ka (1 functions, 0 lifted)"))
            .stdout(predicate::str::contains("notes.txt").not());
    }

    #[test]
    fn dumps_lifted_signatures() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("lift.ka");
        fs::write(
            &input_path,
            "i32 -> i32 outer = \\a (
                i32 -> i32 add = \\x (x + a);
                return add 1;
            );",
        )
        .expect("write input");

        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .arg("--dump-types")
            .arg(&input_path)
            .assert()
            .success()
            .stdout(predicate::str::contains("outer : i32 -> i32"))
            .stdout(predicate::str::contains("__lifted_0 : i32 -> i32 -> i32 (lifted)"));
    }

    #[test]
    fn node_limit_is_configurable() {
        let dir = tempdir().expect("tempdir");
        let input_path = dir.path().join("big.ka");
        fs::write(&input_path, "i32 -> i32 main = \\x (x + x + x + x);").expect("write input");

        Command::cargo_bin("ka-cli")
            .expect("binary exists")
            .arg("--max-nodes")
            .arg("3")
            .arg(&input_path)
            .assert()
            .failure()
            .stderr(predicate::str::contains("limit exceeded"));
    }

    #[test]
    fn expand_paths_keeps_files_and_walks_directories() {
        let dir = tempdir().expect("tempdir");
        fs::write(dir.path().join("a.ka"), "").expect("write");
        let single = dir.path().join("b.ka");
        let files = expand_paths(&[dir.path().to_path_buf(), single.clone()]).expect("expand");
        assert_eq!(files, vec![dir.path().join("a.ka"), single]);
    }
}
