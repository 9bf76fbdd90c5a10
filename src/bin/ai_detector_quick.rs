use ai_detector_lib::models::InputErrorPayload;
use ai_detector_lib::services::detection::detect_quick;
use ai_detector_lib::{read_utf8, to_json_line};

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

fn main() {
    ai_detector_lib::init_logging();
    let args: Vec<String> = std::env::args().skip(1).collect();

    if !has_flag(&args, "--stdin") {
        println!(
            "{}",
            to_json_line(&InputErrorPayload::new("Usage: ai_detector_quick --stdin < file"))
        );
        ai_detector_lib::flush_logs();
        std::process::exit(1);
    }

    match read_utf8(std::io::stdin().lock()) {
        Ok(text) => {
            println!("{}", to_json_line(&detect_quick(&text)));
            ai_detector_lib::flush_logs();
        }
        Err(e) => {
            println!("{}", to_json_line(&InputErrorPayload::new(e.to_string())));
            ai_detector_lib::flush_logs();
            std::process::exit(1);
        }
    }
}
