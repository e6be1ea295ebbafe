pub mod wifi;
pub mod wifi_reconnect;

pub use wifi::WifiConnectivity;
