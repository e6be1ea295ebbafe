// OTA (Over-The-Air) update module
//
// Update flow, once per check interval:
// 1. Open a session and read the candidate's app descriptor
// 2. Compare with the running version; stop if equal
// 3. Stream the image to the next OTA partition
// 4. Verify integrity (appended SHA-256, then esp_ota_end)
// 5. Set boot partition
// 6. Restart

pub mod boot;
pub mod session;
pub mod task;

pub use boot::{EspBootSelector, EspRestart, FreeRtosDelay};
pub use session::{EspTransferSession, EspTransport, FlashedImage};
