//! Gateway identity.
//!
//! Every gateway leaves the factory with a unique eFuse MAC.  The cloud
//! addresses a gateway as `EW-` followed by the low three MAC octets, which
//! is enough to tell units apart within one installation.  Provisioning may
//! override the ID through the `net` namespace (see [`crate::config`]).

use core::fmt;

/// The six MAC octets burned into eFuse.
pub type MacAddress = [u8; 6];

/// Upper bound for a provisioned or derived ID.
const ID_CAPACITY: usize = 16;

/// `EW-XXYYZZ` identifier used in every cloud endpoint path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(heapless::String<ID_CAPACITY>);

impl DeviceId {
    /// Derive the ID from the low half of a MAC.
    pub fn from_mac(mac: &MacAddress) -> Self {
        use core::fmt::Write;
        let mut s = heapless::String::new();
        // Nine characters always fit.
        let _ = write!(s, "EW-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
        Self(s)
    }

    /// ID of the gateway this firmware is running on.
    pub fn factory() -> Self {
        Self::from_mac(&read_mac())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(target_os = "espidf")]
fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0; 6];
    // SAFETY: the buffer is exactly the six bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Host builds pretend to be one fixed gateway so logs and tests are stable.
#[cfg(not(target_os = "espidf"))]
fn read_mac() -> MacAddress {
    [0x24, 0x6F, 0x28, 0x1A, 0x2B, 0x3C]
}
