use blockscan::{spawn_pass, EngineConfig, Message, PassRequest, PassSummary, ScanRequest};
use clap::{Arg, ArgAction, Command};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

fn summary_of(message: &Message) -> Option<&PassSummary> {
    match message {
        Message::Complete(r) => Some(&r.summary),
        Message::SwathComplete(r) => Some(&r.summary),
        Message::GradeTonnageComplete(r) => Some(&r.summary),
        Message::SectionComplete(r) => Some(&r.summary),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("scan")
        .about("Run one streaming pass over a block-model file and print its messages as JSON lines")
        .arg(Arg::new("path").long("path").help("Analyze this file with default settings").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("request").long("request").help("JSON pass request (\"pass\": analyze | swath | grade-tonnage | section)").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("config").long("config").help("JSON engine config; unnamed fields keep their defaults").value_parser(clap::value_parser!(PathBuf)))
        .arg(Arg::new("quiet").long("quiet").help("Suppress header and progress messages").action(ArgAction::SetTrue))
        .arg(Arg::new("pretty").long("pretty").help("Pretty-print the completion message").action(ArgAction::SetTrue))
        .get_matches();

    let request: PassRequest = match (
        matches.get_one::<PathBuf>("request"),
        matches.get_one::<PathBuf>("path"),
    ) {
        (Some(r), _) => read_json(r)?,
        (None, Some(p)) => PassRequest::Analyze(ScanRequest::new(p)),
        (None, None) => anyhow::bail!("provide --request <json> or --path <file>"),
    };
    let config: EngineConfig = match matches.get_one::<PathBuf>("config") {
        Some(c) => read_json(c)?,
        None => EngineConfig::default(),
    };
    let quiet = matches.get_flag("quiet");
    let pretty = matches.get_flag("pretty");
    let source = request.scan().file.display().to_string();

    let start = Instant::now();
    let mut handle = spawn_pass(request, config);
    let mut out = io::BufWriter::new(io::stdout().lock());
    let mut failed = None;
    let mut summary = None;

    while let Some(message) = handle.recv().await {
        if quiet && !message.is_terminal() {
            continue;
        }
        if pretty && message.is_terminal() {
            serde_json::to_writer_pretty(&mut out, &message)?;
        } else {
            serde_json::to_writer(&mut out, &message)?;
        }
        writeln!(&mut out)?;
        out.flush()?;

        if let Message::Error { message: text, .. } = &message {
            failed = Some(text.clone());
        }
        summary = summary_of(&message).cloned().or(summary);
    }

    let elapsed = start.elapsed().as_secs_f64();
    if let Some(s) = summary {
        let rps = (s.rows_read as f64) / elapsed;
        eprintln!(
            "source={} rows={} admitted={} filter_errors={} derive_errors={}\nelapsed={:.1}s rows/sec={:.0}",
            source, s.rows_read, s.rows_admitted, s.filter_errors, s.derive_errors, elapsed, rps
        );
    }
    if let Some(text) = failed {
        anyhow::bail!("{source}: {text}");
    }
    Ok(())
}
