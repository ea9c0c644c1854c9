use super::AppConfig;
use clap::Parser;

fn parse(args: &[&str]) -> AppConfig {
    let mut argv = vec!["voiceloop"];
    argv.extend_from_slice(args);
    AppConfig::parse_from(argv)
}

fn parse_valid(args: &[&str]) -> AppConfig {
    let mut config = parse(args);
    config.validate().expect("config should validate");
    config
}

#[test]
fn defaults_are_valid() {
    let config = parse_valid(&[]);
    assert_eq!(config.sample_rate, 16_000);
    assert_eq!(config.silence_duration_ms, 1_500);
    assert_eq!(config.finalize_debounce_ms, 1_000);
    assert!((config.silence_threshold_db - -50.0).abs() < f32::EPSILON);
}

#[test]
fn pipeline_config_mirrors_cli_values() {
    let config = parse_valid(&[
        "--silence-threshold-db",
        "-42.5",
        "--silence-duration-ms",
        "900",
        "--finalize-debounce-ms",
        "250",
    ]);
    let pipeline = config.pipeline_config();
    assert!((pipeline.silence_threshold_db - -42.5).abs() < f32::EPSILON);
    assert_eq!(pipeline.silence_duration_ms, 900);
    assert_eq!(pipeline.finalize_debounce_ms, 250);
}

#[test]
fn synthesis_config_mirrors_cli_values() {
    let config = parse_valid(&["--tts-voice", "nova", "--tts-speed", "1.25"]);
    let synth = config.synthesis_config();
    assert_eq!(synth.voice, "nova");
    assert!((synth.speed - 1.25).abs() < f32::EPSILON);
}

#[test]
fn rejects_out_of_range_sample_rate() {
    let mut config = parse(&["--sample-rate", "4000"]);
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("--sample-rate"), "got: {err}");
}

#[test]
fn rejects_positive_threshold() {
    let mut config = parse(&["--silence-threshold-db", "3.0"]);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_poll_slower_than_silence_window() {
    let mut config = parse(&["--energy-poll-ms", "800", "--silence-duration-ms", "500"]);
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("--energy-poll-ms"), "got: {err}");
}

#[test]
fn rejects_tiny_debounce() {
    let mut config = parse(&["--finalize-debounce-ms", "50"]);
    assert!(config.validate().is_err());
}

#[test]
fn rejects_non_http_tts_url() {
    let mut config = parse(&["--tts-url", "ftp://example.com/tts"]);
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("--tts-url"), "got: {err}");
}

#[test]
fn rejects_extreme_tts_speed() {
    let mut config = parse(&["--tts-speed", "9.0"]);
    assert!(config.validate().is_err());
}

#[test]
fn trims_language_tag() {
    let config = parse_valid(&["--lang", " en-GB "]);
    assert_eq!(config.lang, "en-GB");
}

#[test]
fn rejects_empty_language_tag() {
    let mut config = parse(&["--lang", "   "]);
    assert!(config.validate().is_err());
}
