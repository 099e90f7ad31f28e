fn main() {
    // Build-time fallbacks for the client configuration (see `ClientConfig::with_build_env`).
    for var in [
        "LIGHTDB_HOST",
        "LIGHTDB_PORT",
        "LIGHTDB_PSK_ID",
        "LIGHTDB_PSK",
        "LIGHTDB_WIFI_SSID",
        "LIGHTDB_WIFI_PASS",
    ] {
        println!("cargo:rerun-if-env-changed={var}");
    }

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
