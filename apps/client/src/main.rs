fn main() {
  let root = std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."));
  let cfg = rexec_core::config::load(Some(&root)).unwrap_or_else(|_| rexec_core::config::Config::default());

  let log_path = root.join(".rexec").join("logs.jsonl");
  rexec_core::logging::init(&log_path, cfg.log_level);

  let code = cli::run(cfg);
  std::process::exit(code);
}
