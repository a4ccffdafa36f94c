fn main() {
    if let Err(err) = bms_monitor_lib::run() {
        eprintln!("bms-monitor: {err:#}");
        std::process::exit(1);
    }
}
