use sinkwalk_core::config::SinkwalkConfig;
use sinkwalk_core::engine::{ExplorationUnit, Explorer};
use sinkwalk_core::program::{BasicBlock, Instruction, Operand, StaticProgram, Stmt, Terminator};
use sinkwalk_core::report;
use sinkwalk_core::state::{MachineState, Reg, Value};
use sinkwalk_core::stepper::BlockStepper;
use sinkwalk_core::{Address, SymVar};

use clap::Parser;
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Cap on stepped units, overriding the config file.
    #[clap(short, long)]
    iterations: Option<u64>,
    /// Write the JSON findings report here, overriding the config file.
    #[clap(long)]
    json_report: Option<PathBuf>,
    /// Enable debug-level logging.
    #[clap(short, long)]
    verbose: bool,
}

const BUF_BASE: u64 = 0x100_0000;
const BUF_LEN: u64 = 0x1000;

/// A small dispatcher-shaped target: the entry block loads a request
/// word out of the input buffer, calls a handler that indexes memory
/// with it, and the post-call block writes through it and issues a
/// service call with a controlled length argument.
fn demo_target(sentinel: u64) -> (StaticProgram, MachineState) {
    let entry = Address(0x8000);
    let post_call = Address(0x8008);
    let handler = Address(0x8100);

    let mut program = StaticProgram::new();
    program.add_block(BasicBlock {
        addr: entry,
        size: 8,
        insns: vec![
            Instruction::new(entry, "ldr"),
            Instruction::new(Address(0x8004), "bl"),
        ],
        stmts: vec![
            Stmt::InsnMark { addr: entry },
            Stmt::Load {
                dst: Reg(4),
                addr: Operand::Offset(Reg(0), 0),
                size: 4,
            },
        ],
        term: Terminator::Call {
            target: handler,
            ret: post_call,
        },
    });
    program.add_block(BasicBlock {
        addr: handler,
        size: 8,
        insns: vec![
            Instruction::new(handler, "ldr"),
            Instruction::new(Address(0x8104), "bx"),
        ],
        stmts: vec![
            Stmt::InsnMark { addr: handler },
            Stmt::Load {
                dst: Reg(5),
                addr: Operand::Sum(Reg(0), Reg(4)),
                size: 4,
            },
        ],
        term: Terminator::Return,
    });
    program.add_block(BasicBlock {
        addr: post_call,
        size: 8,
        insns: vec![
            Instruction::new(post_call, "str"),
            Instruction::new(Address(0x800c), "svc"),
        ],
        stmts: vec![
            Stmt::InsnMark { addr: post_call },
            Stmt::Store {
                addr: Operand::Reg(Reg(4)),
                src: Operand::Imm(0),
                size: 4,
            },
        ],
        term: Terminator::ServiceCall {
            ret: Address(0x8010),
        },
    });
    program.add_edge(entry, handler);
    program.add_edge(handler, post_call);

    let mut seed = MachineState::new(entry);
    seed.bind_region(BUF_BASE, BUF_LEN, SymVar::input("in_buf"));
    seed.set_reg(Reg(0), Value::Concrete(BUF_BASE));
    seed.set_reg(
        Reg(1),
        Value::Symbolic(sinkwalk_core::AddrExpr::from_var(SymVar::input("in_len"))),
    );
    seed.set_reg(Reg::LR, Value::Concrete(sentinel));

    (program, seed)
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    simplelog::TermLogger::init(
        if cli.verbose {
            simplelog::LevelFilter::Debug
        } else {
            simplelog::LevelFilter::Info
        },
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let mut config = match cli.config_file {
        Some(config_path) => {
            println!("Loading configuration from specified path: {config_path:?}");
            SinkwalkConfig::load_from_file(&config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                println!(
                    "No config file specified via CLI, loading default: {default_config_path:?}",
                );
                SinkwalkConfig::load_from_file(&default_config_path)?
            } else {
                println!(
                    "No config file specified and default 'config.toml' not found, using built-in defaults."
                );
                SinkwalkConfig::default()
            }
        }
    };

    if let Some(iterations) = cli.iterations {
        config.explorer.max_iterations = Some(iterations);
    }
    if let Some(path) = cli.json_report {
        config.report.json_path = Some(path);
    }

    println!("Effective configuration: {config:#?}");

    let (program, seed) = demo_target(config.explorer.sentinel_return);
    let mut rng = ChaCha8Rng::from_seed([0u8; 32]);
    let mut explorer = Explorer::new(&program, BlockStepper::new(), config.explorer.clone());

    println!("Starting exploration at {}...", seed.pc());
    let start_time = Instant::now();
    explorer.run(vec![ExplorationUnit::seed(seed)], &mut rng)?;
    let elapsed = start_time.elapsed();

    println!(
        "Explored {} units in {:.2?}.",
        explorer.units_stepped(),
        elapsed
    );

    let findings = explorer.findings();
    if findings.is_empty() {
        println!("No tainted sinks found.");
    } else {
        println!("{} tainted sink(s):", findings.len());
        print!("{}", report::render_text(findings));
    }

    if let Some(path) = &config.report.json_path {
        report::write_json(findings, path)?;
        println!("JSON report written to {path:?}");
    }

    Ok(())
}
