use serde::Serialize;
use uom::si::information::byte;

pub type Information = uom::si::u64::Information;

/// How much space something takes on the wire.
pub trait DataSized {
    fn size(&self) -> Information;
}

// Sizes are of the JSON encoding, which is what gets published.
impl<T: Serialize> DataSized for T {
    fn size(&self) -> Information {
        let len = serde_json::to_string(self).map_or(0, |s| s.len());
        Information::new::<byte>(len.try_into().unwrap_or(u64::MAX))
    }
}
