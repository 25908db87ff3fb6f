use clap::{Arg, ArgAction, Command};
use std::io::{self, Write};

const DOMAINS: [&str; 4] = ["OX", "TR", "FR", "WASTE"];

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Write a synthetic block model (x fastest, then y, then z) to stdout")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(Arg::new("block").long("block").default_value("10"))
        .arg(
            Arg::new("sub_block")
                .long("sub-block")
                .help("Split every third parent block into this many sub-blocks along x")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(Arg::new("nx").long("nx").default_value("100"))
        .arg(Arg::new("ny").long("ny").default_value("100"))
        .arg(Arg::new("delim").long("delim").default_value(","))
        .arg(
            Arg::new("no_header")
                .long("no-header")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let rows: u64 = *matches.get_one("rows").unwrap();
    let block: f64 = matches.get_one::<String>("block").unwrap().parse()?;
    let split = matches.get_one::<u32>("sub_block").copied().filter(|n| *n > 1);
    let nx: u64 = matches.get_one::<String>("nx").unwrap().parse()?;
    let ny: u64 = matches.get_one::<String>("ny").unwrap().parse()?;
    let d = match matches.get_one::<String>("delim").unwrap().as_str() {
        "tab" | "\\t" => "\t".to_string(),
        other => other.to_string(),
    };

    let mut out = io::BufWriter::new(io::stdout().lock());

    if !matches.get_flag("no_header") {
        writeln!(&mut out, "xc{d}yc{d}zc{d}xinc{d}yinc{d}zinc{d}au{d}cu{d}density{d}domain")?;
    }

    let half = block / 2.0;
    let mut written = 0u64;
    let mut parent = 0u64;
    while written < rows {
        let (i, j, k) = (parent % nx, (parent / nx) % ny, parent / (nx * ny));
        let (x0, y, z) = (i as f64 * block, j as f64 * block + half, k as f64 * block + half);
        let pieces = match split {
            Some(n) if parent % 3 == 0 => n,
            _ => 1,
        };
        let dx = block / pieces as f64;
        for p in 0..pieces {
            if written >= rows {
                break;
            }
            let x = x0 + dx * (p as f64 + 0.5);
            // deterministic pseudo-grades
            let h = written.wrapping_mul(2_654_435_761) % 10_000;
            let au = h as f64 / 2_000.0;
            let cu = ((h * 7) % 10_000) as f64 / 5_000.0;
            let density = 2.5 + (h % 50) as f64 / 100.0;
            let domain = DOMAINS[(k as usize + (i as usize / 10)) % DOMAINS.len()];
            writeln!(
                &mut out,
                "{x}{d}{y}{d}{z}{d}{dx}{d}{block}{d}{block}{d}{au:.3}{d}{cu:.3}{d}{density:.2}{d}{domain}"
            )?;
            written += 1;
            if written % 10_000 == 0 {
                out.flush()?;
            } // keep buffers moving on huge runs
        }
        parent += 1;
    }

    out.flush()?;
    Ok(())
}
