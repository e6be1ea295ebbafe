use std::fs;
use std::path::Path;

const CONFIG_HEADER: &str = "ota_config.h";
const CONFIG_DEFINES: [&str; 3] = ["WIFI_SSID", "WIFI_PASSWORD", "OTA_URL"];

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF; host builds of the workspace skip it
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    println!("cargo:rerun-if-changed={}", CONFIG_HEADER);

    // Read device configuration if it exists
    let contents = if Path::new(CONFIG_HEADER).exists() {
        fs::read_to_string(CONFIG_HEADER)?
    } else {
        println!(
            "cargo:warning={} not found! Copy {}.example to {} and add your credentials and update URL.",
            CONFIG_HEADER, CONFIG_HEADER, CONFIG_HEADER
        );
        String::new()
    };

    for name in CONFIG_DEFINES {
        let value = define_value(&contents, name).unwrap_or_default();
        println!("cargo:rustc-env={}={}", name, value);
    }

    Ok(())
}

/// Value of `#define NAME "value"`
fn define_value<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    contents
        .lines()
        .find(|l| {
            let mut words = l.split_whitespace();
            words.next() == Some("#define") && words.next() == Some(name)
        })
        .and_then(|l| l.split('"').nth(1))
}
