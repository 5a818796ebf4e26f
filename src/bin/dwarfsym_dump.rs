//! Minimal collaborating driver (§1 "out of scope: the interactive
//! menu-driven front end"): opens a binary, prints its compilation
//! units, and optionally dumps one CU's DIE tree or resolves a PC to a
//! source line. Everything here is a thin wrapper over `dwarfsym`'s
//! façade — no DWARF-specific logic lives in this binary.

use clap::{Parser, Subcommand};
use dwarfsym::DwarfContext;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Object file containing DWARF debugging information
    path: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every compilation unit
    Units,
    /// Print the DIE subtree of a named compilation unit
    Tree {
        /// Source filename as recorded by the compiler
        cu: String,
    },
    /// Resolve a program counter to (file, function, line)
    Line {
        /// Source filename as recorded by the compiler
        cu: String,
        /// Program counter, decimal or `0x`-prefixed hex
        pc: String,
    },
}

fn parse_pc(s: &str) -> Option<u64> {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .map(|hex| u64::from_str_radix(hex, 16).ok())
        .unwrap_or_else(|| s.parse().ok())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let ctx = match DwarfContext::open(&args.path) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("failed to open {}: {e}", args.path.display());
            return ExitCode::FAILURE;
        }
    };

    match args.command.unwrap_or(Command::Units) {
        Command::Units => {
            for cu in ctx.compilation_units() {
                println!("{}", cu.name().unwrap_or("<unknown>"));
            }
        }
        Command::Tree { cu } => match ctx.find_cu_by_name(&cu) {
            Ok(cu) => {
                let root = cu.root();
                print!("{}", ctx_root_subtree(&ctx, cu, root));
            }
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
        },
        Command::Line { cu, pc } => {
            let Some(pc) = parse_pc(&pc) else {
                eprintln!("invalid program counter: {pc}");
                return ExitCode::FAILURE;
            };
            match ctx.find_cu_by_name(&cu) {
                Ok(cu) => match ctx.pc_to_place(cu, pc) {
                    Ok(place) => println!(
                        "{}:{} ({})",
                        place.file.as_deref().unwrap_or("?"),
                        place.line,
                        place.function.as_deref().unwrap_or("?")
                    ),
                    Err(e) => {
                        eprintln!("{e}");
                        return ExitCode::FAILURE;
                    }
                },
                Err(e) => {
                    eprintln!("{e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    }

    ExitCode::SUCCESS
}

fn ctx_root_subtree(
    ctx: &DwarfContext,
    cu: &dwarfsym::dwarf::registry::CompilationUnit,
    root: dwarfsym::dwarf::die::DieId,
) -> String {
    ctx.die(cu, root).pretty_print_subtree()
}
