//! Catalogue of supported Push hardware and bus-level constants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// USB vendor id shared by every supported device (0x2982).
pub const VENDOR_ID: u16 = 10626;

/// Bulk-out endpoint carrying display data.
pub const BULK_EP_OUT: u8 = 0x01;

/// Bound for both the "no data" and "completion" phase of a transfer.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_millis(1000);

// ── PushDevice ───────────────────────────────────────────────────

/// A supported hardware variant. The set is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PushDevice {
    Push2,
    Push3,
    Push3Sa,
}

impl PushDevice {
    /// Every supported variant, in discovery order.
    pub const ALL: [PushDevice; 3] = [PushDevice::Push2, PushDevice::Push3, PushDevice::Push3Sa];

    pub const fn vendor_id(self) -> u16 {
        VENDOR_ID
    }

    pub const fn product_id(self) -> u16 {
        match self {
            PushDevice::Push2 => 6503,
            PushDevice::Push3 => 6504,
            PushDevice::Push3Sa => 6505,
        }
    }

    /// Human-readable model name.
    pub const fn name(self) -> &'static str {
        match self {
            PushDevice::Push2 => "Push 2",
            PushDevice::Push3 => "Push 3",
            PushDevice::Push3Sa => "Push 3 SA",
        }
    }

    /// Look up a variant by product id.
    pub fn from_product_id(product_id: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.product_id() == product_id)
    }
}

impl std::fmt::Display for PushDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for PushDevice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "push2" | "push-2" => Ok(PushDevice::Push2),
            "push3" | "push-3" => Ok(PushDevice::Push3),
            "push3-sa" | "push3sa" | "push-3-sa" => Ok(PushDevice::Push3Sa),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn product_ids() {
        assert_eq!(PushDevice::Push2.product_id(), 6503);
        assert_eq!(PushDevice::Push3.product_id(), 6504);
        assert_eq!(PushDevice::Push3Sa.product_id(), 6505);
    }

    #[test]
    fn names() {
        assert_eq!(PushDevice::Push2.to_string(), "Push 2");
        assert_eq!(PushDevice::Push3.to_string(), "Push 3");
        assert_eq!(PushDevice::Push3Sa.to_string(), "Push 3 SA");
    }

    #[test]
    fn product_ids_are_unique() {
        let ids: HashSet<u16> = PushDevice::ALL.iter().map(|d| d.product_id()).collect();
        assert_eq!(ids.len(), PushDevice::ALL.len());
    }

    #[test]
    fn lookup_by_product_id() {
        assert_eq!(PushDevice::from_product_id(6505), Some(PushDevice::Push3Sa));
        assert_eq!(PushDevice::from_product_id(1967), None);
    }

    #[test]
    fn constants() {
        assert_eq!(VENDOR_ID, 0x2982);
        assert_eq!(BULK_EP_OUT, 0x01);
        assert_eq!(TRANSFER_TIMEOUT.as_millis(), 1000);
    }

    #[test]
    fn parse_names() {
        assert_eq!("push2".parse::<PushDevice>().unwrap(), PushDevice::Push2);
        assert_eq!("Push3-SA".parse::<PushDevice>().unwrap(), PushDevice::Push3Sa);
        assert!("push1".parse::<PushDevice>().is_err());
    }
}
