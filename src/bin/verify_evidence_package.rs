//! 离线证据包校验器
//!
//! ```bash
//! verify_evidence_package evidence-rep-42.zip
//! verify_evidence_package evidence-rep-42.zip --json
//! ```
//!
//! 退出码：0 = PASS，1 = FAIL，2 = ERROR (不是 ZIP、无法读取或结构不完整)。

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use evidence_integrity::verify::{verify_path, Verdict};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "verify_evidence_package")]
#[command(version)]
#[command(about = "Verify an exported evidence package offline, using only the bytes on disk")]
struct Cli {
    /// Path to the evidence package (.zip)
    archive: PathBuf,

    /// Emit the verification report as JSON instead of the boxed text report
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    // 日志写 stderr，stdout 只留给报告
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let report = verify_path(&cli.archive);

    if cli.json {
        match report.to_json() {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("failed to render verification report: {err}");
                return ExitCode::from(Verdict::Error.exit_code());
            }
        }
    } else {
        print!("{}", report.render_text());
    }

    ExitCode::from(report.exit_code)
}
