//! mips3-seqdump: print the descriptor chains the recompiler's
//! front end builds for a raw MIPS code image.
//!
//! Loads a flat binary at a guest base address, describes the
//! sequence around each requested entry PC and prints every
//! descriptor with its flags, cycle cost and register liveness.

use std::env;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::process;

use mips3_core::config::{DEFAULT_MAX_SEQUENCE, DEFAULT_WINDOW_AFTER, DEFAULT_WINDOW_BEFORE};
use mips3_core::MipsFlavor;
use mips3_frontend::{DescFlags, DescId, FetchedOp, InsnDesc, InsnSource, Sequencer, TARGET_DYNAMIC};

struct Args {
    image_path: String,
    base: u32,
    starts: Vec<u32>,
    little_endian: bool,
    flavor: MipsFlavor,
    max_sequence: u32,
    output: Option<String>,
}

const USAGE: &str = "\
usage: mips3-seqdump <image> [options]

Options:
  --base <hex>       Guest address of the first byte (default: 0xbfc00000)
  --start <hex>      Entry PC to describe; may repeat (default: base)
  --le               Image is little-endian
  --mips4            Decode MIPS IV encodings
  --max-seq <n>      Max instructions per sub-sequence (default: 32)
  -o <file>          Output to file
  -h, --help         Show this help";

fn parse_hex(s: &str) -> u32 {
    let s = s.trim_start_matches("0x");
    u32::from_str_radix(s, 16).unwrap_or_else(|_| {
        eprintln!("invalid hex address: {s}");
        process::exit(1);
    })
}

fn value(args: &[String], i: usize) -> &str {
    args.get(i).map(String::as_str).unwrap_or_else(|| {
        eprintln!("missing value for {}", args[i - 1]);
        process::exit(1);
    })
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        eprintln!("{USAGE}");
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let mut a = Args {
        image_path: args[1].clone(),
        base: 0xbfc0_0000,
        starts: Vec::new(),
        little_endian: false,
        flavor: MipsFlavor::Mips3,
        max_sequence: DEFAULT_MAX_SEQUENCE,
        output: None,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--base" => {
                i += 1;
                a.base = parse_hex(value(&args, i));
            }
            "--start" => {
                i += 1;
                a.starts.push(parse_hex(value(&args, i)));
            }
            "--le" => a.little_endian = true,
            "--mips4" => a.flavor = MipsFlavor::Mips4,
            "--max-seq" => {
                i += 1;
                a.max_sequence = value(&args, i).parse().unwrap_or_else(|_| {
                    eprintln!("invalid max-seq");
                    process::exit(1);
                });
            }
            "-o" => {
                i += 1;
                a.output = Some(value(&args, i).to_string());
            }
            other => {
                eprintln!("unknown option: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }
    if a.starts.is_empty() {
        a.starts.push(a.base);
    }
    a
}

/// A code image mapped at a fixed guest address.
struct Image {
    base: u32,
    data: Vec<u8>,
    little_endian: bool,
}

impl InsnSource for Image {
    fn translate_pc(&self, pc: u32) -> Option<u32> {
        let off = pc.wrapping_sub(self.base) as usize;
        (off + 4 <= self.data.len()).then_some(pc)
    }

    fn fetch(&mut self, physpc: u32) -> FetchedOp {
        let off = physpc.wrapping_sub(self.base) as usize;
        let mut bytes = [0u8; 4];
        if let Some(src) = self.data.get(off..off + 4) {
            bytes.copy_from_slice(src);
        }
        let word = if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        };
        FetchedOp { word, host: None }
    }
}

fn regmask(mask: u64) -> String {
    if mask == 0 {
        return "-".to_string();
    }
    let mut out = Vec::new();
    for r in 0..32 {
        if mask & (1 << r) != 0 {
            out.push(format!("r{r}"));
        }
    }
    if mask & (1 << 32) != 0 {
        out.push("lo".to_string());
    }
    if mask & (1 << 33) != 0 {
        out.push("hi".to_string());
    }
    out.join(",")
}

fn dump_desc(w: &mut impl Write, desc: &InsnDesc, indent: &str) -> io::Result<()> {
    write!(
        w,
        "{indent}{:08x}: {:08x}  {:<10} c={} {:?}",
        desc.pc,
        desc.opcode(),
        format!("{:?}", desc.insn.kind).to_lowercase(),
        desc.cycles,
        desc.flags
    )?;
    if desc.is_branch() {
        if desc.targetpc == TARGET_DYNAMIC {
            write!(w, " -> *")?;
        } else {
            write!(w, " -> {:08x}", desc.targetpc)?;
        }
    }
    writeln!(w)?;
    writeln!(
        w,
        "{indent}            live in [{}] out [{}]",
        regmask(desc.gpr.liveread),
        regmask(desc.gpr.livewrite)
    )
}

fn dump_chain(
    w: &mut impl Write,
    seq: &Sequencer,
    head: Option<DescId>,
) -> io::Result<usize> {
    let mut count = 0;
    for (_, desc) in seq.chain(head) {
        dump_desc(w, desc, "  ")?;
        if let Some(slot) = desc.delay.and_then(|id| seq.desc(id)) {
            dump_desc(w, slot, "    ")?;
        }
        if desc.flags.contains(DescFlags::END_SEQUENCE) {
            writeln!(w, "  ----")?;
        }
        count += 1;
    }
    Ok(count)
}

fn main() {
    env_logger::init();
    let args = parse_args();

    let data = fs::read(&args.image_path).unwrap_or_else(|e| {
        let p = &args.image_path;
        eprintln!("failed to read {p}: {e}");
        process::exit(1);
    });
    log::info!("loaded {} bytes at {:#010x}", data.len(), args.base);

    let mut image = Image {
        base: args.base,
        data,
        little_endian: args.little_endian,
    };
    let window = DEFAULT_WINDOW_BEFORE + DEFAULT_WINDOW_AFTER;
    let mut seq = Sequencer::new(args.flavor, window);

    let out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(fs::File::create(path).unwrap_or_else(|e| {
            eprintln!("failed to create {path}: {e}");
            process::exit(1);
        })),
        None => Box::new(io::stdout()),
    };
    let mut w = BufWriter::new(out);

    for &start in &args.starts {
        let minpc = start.saturating_sub(DEFAULT_WINDOW_BEFORE).max(args.base);
        let maxpc = start.saturating_add(DEFAULT_WINDOW_AFTER);
        let head = match seq.describe_sequence(&mut image, start, minpc, maxpc, args.max_sequence)
        {
            Ok(head) => head,
            Err(e) => {
                eprintln!("{start:#010x}: {e}");
                process::exit(1);
            }
        };

        let result = writeln!(w, "sequence {start:08x} [{minpc:08x}, {maxpc:08x})")
            .and_then(|_| dump_chain(&mut w, &seq, head));
        match result {
            Ok(n) => log::debug!("{start:#010x}: {n} descriptors"),
            Err(e) => {
                eprintln!("write failed: {e}");
                process::exit(1);
            }
        }
        seq.release(head);
    }

    if let Err(e) = w.flush() {
        eprintln!("write failed: {e}");
        process::exit(1);
    }
}
