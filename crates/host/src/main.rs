//! Command-line front end for the eetool programmer.

use std::fs::OpenOptions;
use std::path::Path;
use std::process;

use eetool_core::image::{self, DeviceImage};
use eetool_core::sim::ChipKind;
use eetool_core::{BLOCK_SIZE, ROM_SIZE};
use eetool_host::bench::SimBench;
use eetool_host::Link;

fn usage() -> ! {
    eprintln!("Usage: eetool [OPTIONS] COMMAND");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  ping               Check that the programmer answers");
    eprintln!("  dump <out>         Read the device into <out> (.eepi or raw)");
    eprintln!("  burn <in>          Program <in> (.eepi or raw) into the device");
    eprintln!("  selftest           Exercise the full protocol against a simulated board");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --port <path>      Serial device node (default /dev/ttyACM0)");
    eprintln!("  --blocks <n>       Blocks to dump (default {})", ROM_SIZE / BLOCK_SIZE);
    eprintln!("  --debug            Per-block progress on stderr");
    process::exit(1);
}

struct Options {
    port: String,
    blocks: usize,
    debug: bool,
    command: String,
    file: Option<String>,
}

fn parse_args() -> Options {
    let mut opts = Options {
        port: String::from("/dev/ttyACM0"),
        blocks: ROM_SIZE / BLOCK_SIZE,
        debug: false,
        command: String::new(),
        file: None,
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--port" => match args.next() {
                Some(p) => opts.port = p,
                None => usage(),
            },
            "--blocks" => match args.next().and_then(|n| n.parse().ok()) {
                Some(n) if n > 0 && n <= ROM_SIZE / BLOCK_SIZE => opts.blocks = n,
                _ => usage(),
            },
            "--debug" => opts.debug = true,
            _ if arg.starts_with("--") => usage(),
            _ if opts.command.is_empty() => opts.command = arg,
            _ if opts.file.is_none() => opts.file = Some(arg),
            _ => usage(),
        }
    }
    if opts.command.is_empty() {
        usage();
    }
    opts
}

fn open_port(path: &str) -> Link<std::fs::File> {
    let stream = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap_or_else(|e| {
            eprintln!("Failed to open port {}: {}", path, e);
            process::exit(1);
        });
    Link::new(stream)
}

fn is_image_path(path: &Path) -> bool {
    path.extension().map(|e| e == "eepi").unwrap_or(false)
}

fn load_input(path: &Path) -> Vec<u8> {
    if is_image_path(path) {
        let image = image::load_from_file(path).unwrap_or_else(|e| {
            eprintln!("Failed to load image {}: {}", path.display(), e);
            process::exit(1);
        });
        image.rom
    } else {
        std::fs::read(path).unwrap_or_else(|e| {
            eprintln!("Failed to read {}: {}", path.display(), e);
            process::exit(1);
        })
    }
}

fn save_output(path: &Path, rom: Vec<u8>) {
    if is_image_path(path) {
        let image = DeviceImage { kind: ChipKind::MaskRom.to_byte(), rom };
        image::save_to_file(&image, path).unwrap_or_else(|e| {
            eprintln!("Failed to save image {}: {}", path.display(), e);
            process::exit(1);
        });
    } else {
        std::fs::write(path, &rom).unwrap_or_else(|e| {
            eprintln!("Failed to write {}: {}", path.display(), e);
            process::exit(1);
        });
    }
}

fn selftest(debug: bool) {
    // Burn a pattern into a simulated EEPROM and check the chip directly.
    let mut link = Link::new(SimBench::new(ChipKind::Eeprom));
    link.debug = debug;
    link.ping().expect("selftest: ping failed");
    let pattern: Vec<u8> = (0..ROM_SIZE).map(|i| (i * 13 + 7) as u8).collect();
    link.burn(&pattern).expect("selftest: burn failed");
    let bench = link.into_inner();
    assert_eq!(bench.chip_mem(), &pattern[..], "selftest: burned image mismatch");
    println!("burn path OK ({} bytes)", ROM_SIZE);

    // Dump a preloaded simulated mask ROM and compare against the preload.
    let mut bench = SimBench::new(ChipKind::MaskRom);
    bench.load_chip(&pattern);
    let mut link = Link::new(bench);
    link.debug = debug;
    let dump = link.dump(ROM_SIZE / BLOCK_SIZE).expect("selftest: dump failed");
    assert_eq!(dump, pattern, "selftest: dumped image mismatch");
    println!("dump path OK ({} bytes)", ROM_SIZE);
}

fn main() {
    let opts = parse_args();

    match opts.command.as_str() {
        "ping" => {
            let mut link = open_port(&opts.port);
            link.debug = opts.debug;
            link.ping().unwrap_or_else(|e| {
                eprintln!("Ping failed: {}", e);
                process::exit(1);
            });
            println!("programmer is alive");
        }
        "dump" => {
            let Some(file) = opts.file.as_deref() else { usage() };
            let mut link = open_port(&opts.port);
            link.debug = opts.debug;
            let rom = link.dump(opts.blocks).unwrap_or_else(|e| {
                eprintln!("Dump failed: {}", e);
                process::exit(1);
            });
            save_output(Path::new(file), rom);
            println!("dumped {} blocks to {}", opts.blocks, file);
        }
        "burn" => {
            let Some(file) = opts.file.as_deref() else { usage() };
            let rom = load_input(Path::new(file));
            let mut link = open_port(&opts.port);
            link.debug = opts.debug;
            link.burn(&rom).unwrap_or_else(|e| {
                eprintln!("Burn failed: {}", e);
                process::exit(1);
            });
            println!("burned {} bytes from {}", rom.len(), file);
        }
        "selftest" => selftest(opts.debug),
        _ => usage(),
    }
}
