use clap::Parser as ClapParser;
use std::{
    fs,
    io::BufReader,
    path::{Path, PathBuf},
    process,
    sync::Arc,
    thread,
};

use gelo::{Error, List, Runtime, RuntimeCreateInfo, Stdio, TraceFlags, Vm, Word, builtins};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Script to run
    #[arg(required_unless_present = "eval", help = "The script file to execute")]
    script: Option<PathBuf>,

    /// Bound to `arguments` while the script runs
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,

    /// Comma separated trace channels: parse, run, sys, alien or all
    #[arg(long, value_parser = parse_traces, default_value = "")]
    trace: TraceFlags,

    /// Script run on the same VM before the main program
    #[arg(long)]
    prelude: Option<PathBuf>,

    /// Run this source text instead of a script file
    #[arg(long, conflicts_with = "script")]
    eval: Option<String>,
}

fn parse_traces(names: &str) -> Result<TraceFlags, String> {
    TraceFlags::from_names(names).ok_or_else(|| format!("unknown trace channel in '{names}'"))
}

fn init_logging(traces: TraceFlags) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Warn);
    for target in traces.targets() {
        builder.filter_module(target, log::LevelFilter::Trace);
    }
    builder.parse_default_env();
    builder.init();
}

fn open(path: &Path) -> BufReader<fs::File> {
    match fs::File::open(path) {
        Ok(file) => BufReader::new(file),
        Err(err) => {
            eprintln!("Error reading file '{}': {}", path.display(), err);
            process::exit(1);
        }
    }
}

fn run(cli: &Cli, vm: &mut Vm) -> Result<Word, Error> {
    vm.register_bundles(builtins::core_bundles())?;
    if let Some(prelude) = &cli.prelude {
        vm.run(open(prelude), List::new())?;
    }
    if let Some(source) = &cli.eval {
        return vm.do_str(source);
    }
    let args: List = cli.args.iter().map(|a| Word::from(a.as_str())).collect();
    match &cli.script {
        Some(script) => vm.run(open(script), args),
        None => Ok(Word::null()),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.trace);

    let runtime = Runtime::new(RuntimeCreateInfo {
        traces: cli.trace,
        ..Default::default()
    });
    let root = {
        let runtime = runtime.clone();
        thread::Builder::new()
            .name("gelo-main".into())
            .stack_size(runtime.stack_size())
            .spawn(move || {
                let mut vm = runtime.new_vm(Arc::new(Stdio::new()));
                let outcome = run(&cli, &mut vm);
                // children started with `go` are stopped along with the root
                vm.destroy();
                outcome
            })
    };
    let outcome = match root.map(|handle| handle.join()) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            eprintln!("Error: the root VM panicked");
            process::exit(1);
        }
        Err(err) => {
            eprintln!("Error: could not start the root VM: {err}");
            process::exit(1);
        }
    };
    runtime.join_threads();

    if let Err(err) = outcome {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}
