// Stdout carries only the JSON result; logs go to stderr

use std::io::Write;

use ai_detector_lib::models::InputErrorPayload;
use ai_detector_lib::{run_cli, run_detached, to_json_line};

fn main() {
    ai_detector_lib::init_logging();
    let (line, code) = match run_detached(run_cli(std::env::args().skip(1))) {
        Ok(result) => result,
        Err(e) => (
            to_json_line(&InputErrorPayload::new(format!("Failed to start runtime: {}", e))),
            1,
        ),
    };

    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
    drop(stdout);
    ai_detector_lib::flush_logs();
    std::process::exit(code);
}
