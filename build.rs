fn main() {
    // Build stamp for `helios-cli info`. Numeric accessors keep this free of
    // format-string parsing.
    let now = time::OffsetDateTime::now_utc();
    println!(
        "cargo:rustc-env=HELIOS_BUILD_DATE={:04}-{:02}-{:02}",
        now.year(),
        now.month() as u8,
        now.day()
    );
    println!(
        "cargo:rustc-env=HELIOS_BUILD_TIME={:02}:{:02}:{:02} UTC",
        now.hour(),
        now.minute(),
        now.second()
    );
    println!("cargo:rerun-if-changed=build.rs");
}
