use clap::{Parser, Subcommand};
use inibin::document::{Document, FileKind, LoadOptions};
use inibin::hash::{hash, hash_pair};
use inibin::luaobj::{tree_from_state, Instruction, Interpreter, LuaObjReader, Opcode};
use inibin::NameDictionary;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "inibin", about = "Inibin / troybin / luaobj property file tool")]
struct Cli {
    /// Log decode progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Names {
    /// Rule file for .inibin files
    #[arg(long)]
    dict: Option<PathBuf>,
    /// Rule file for .troybin files
    #[arg(long)]
    troybin_dict: Option<PathBuf>,
    /// Property vocabulary for dynamic troybin sections
    #[arg(long)]
    vocabulary: Option<PathBuf>,
    /// Skip the dynamic section resolver
    #[arg(long)]
    no_resolve: bool,
}

impl Names {
    fn options(&self) -> LoadOptions {
        let defaults = LoadOptions::default();
        LoadOptions {
            dictionary:               self.dict.clone().or(defaults.dictionary),
            troybin_dictionary:       self.troybin_dict.clone().or(defaults.troybin_dictionary),
            vocabulary:               self.vocabulary.clone().or(defaults.vocabulary),
            resolve_dynamic_sections: !self.no_resolve,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the organized property tree
    Dump {
        input: PathBuf,
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
        /// Only sections/properties whose name, value or hash contains this
        #[arg(short, long)]
        filter: Option<String>,
        #[command(flatten)]
        names: Names,
    },
    /// Hash a name, or a section/property pair
    Hash {
        section: String,
        property: Option<String>,
        /// Report which property of this file carries the hash
        #[arg(long)]
        file: Option<PathBuf>,
        #[command(flatten)]
        names: Names,
    },
    /// Brute-force a hash against section × property candidates
    Guess {
        /// Target hash (decimal or 0x-prefixed hex)
        target: String,
        #[arg(short, long, required = true, num_args = 1..)]
        sections: Vec<String>,
        #[arg(short, long, required = true, num_args = 1..)]
        properties: Vec<String>,
    },
    /// Decode and re-encode; the output extension selects the format
    Rewrite {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        names: Names,
    },
    /// Disassemble a luaobj chunk and show the tables it builds
    Lua {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "inibin=debug" } else { "inibin=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, json, filter, names } => {
            let doc = Document::open(&input, &names.options())?;
            if let Some(report) = doc.resolve_report() {
                eprintln!("dynamic groups: {:?}, resolved {}", report.groups, report.resolved);
            }
            let file = match filter {
                Some(q) => doc.file().filter(&q),
                None    => doc.file().clone(),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&file)?);
            } else {
                print!("{}", file.to_text());
            }
        }

        // ── Hash ─────────────────────────────────────────────────────────────
        Commands::Hash { section, property, file, names } => {
            let h = match &property {
                Some(p) => hash_pair(&section, p),
                None    => hash(&section),
            };
            println!("{h} ({h:#010x})");
            if let Some(path) = file {
                let doc = Document::open(&path, &names.options())?;
                match doc.file().find_hash(h) {
                    Some((sec, p)) => println!("  found in [{}] as {} = {}", sec, p.display_name(), p.value),
                    None           => println!("  not present in {}", path.display()),
                }
            }
        }

        // ── Guess ────────────────────────────────────────────────────────────
        Commands::Guess { target, sections, properties } => {
            let target = parse_hash(&target)?;
            let mut dict = NameDictionary::new();
            match dict.try_guess_hash(target, &sections, &properties) {
                Some(rule) => println!("{rule}"),
                None       => println!("no match for {target}"),
            }
        }

        // ── Rewrite ──────────────────────────────────────────────────────────
        Commands::Rewrite { input, output, names } => {
            let kind = FileKind::from_path(&output)
                .ok_or_else(|| format!("cannot infer output format from {}", output.display()))?;
            let doc = Document::open(&input, &names.options())?;
            let props = doc.file().property_count();
            Document::from_file(kind, doc.into_file()).save(&output)?;
            println!("Wrote {} properties → {}", props, output.display());
        }

        // ── Lua ──────────────────────────────────────────────────────────────
        Commands::Lua { input } => {
            let chunk = LuaObjReader::read(&std::fs::read(&input)?)?;
            println!("── {} ─────────────────────────────────────────", chunk.label());
            println!("  Constants      {}", chunk.constants.len());
            println!("  Prototypes     {}", chunk.prototypes.len());
            println!("  Max stack      {}", chunk.max_stack_size);
            for (pc, word) in chunk.instructions.iter().enumerate() {
                println!("  {:>4}  {}", pc, disassemble(Instruction(*word)));
            }

            let mut vm = Interpreter::new();
            vm.interpret(&chunk);
            println!();
            print!("{}", tree_from_state(&vm).to_text());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_hash(s: &str) -> Result<u32, std::num::ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None      => s.parse(),
    }
}

fn disassemble(ins: Instruction) -> String {
    match ins.opcode() {
        Some(op @ (Opcode::LoadK | Opcode::GetGlobal | Opcode::SetGlobal | Opcode::Closure)) => {
            format!("{:<10} {} {}", format!("{op:?}").to_uppercase(), ins.a(), ins.bx())
        }
        Some(op) => format!("{:<10} {} {} {}", format!("{op:?}").to_uppercase(), ins.a(), ins.b(), ins.c()),
        None     => format!("{:<10} {:#010x}", "???", ins.0),
    }
}
