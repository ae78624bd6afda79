//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements         | Connects to                  |
//! |-------------|--------------------|------------------------------|
//! | `device_id` | (none)             | eFuse factory MAC            |
//! | `http`      | HttpPort           | ESP-IDF HTTP(S) client       |
//! | `log_sink`  | EventSink          | Serial log output            |
//! | `nvs`       | StoragePort        | NVS / in-memory store        |
//! | `ota_slot`  | FirmwareSlot       | Inactive OTA app partition   |
//! | `platform`  | PlatformPort       | Heap, power management, reset|
//! | `time`      | Clock              | ESP32 system timer, SNTP time|
//! | `wifi`      | ConnectivityPort   | ESP-IDF WiFi STA             |

pub mod device_id;
pub mod http;
pub mod log_sink;
pub mod nvs;
pub mod ota_slot;
pub mod platform;
pub mod time;
pub mod wifi;
