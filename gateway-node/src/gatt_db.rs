//! Attribute table for the GATT server
//!
//! Built once at boot as a vector sorted by handle and searched with binary
//! search. Construction rejects unsorted or duplicate handles, so every later
//! lookup may rely on the ordering.

use gateway_mcu::{GattStatus, attr_type};

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("attribute handles out of order: {prev:#06x} then {next:#06x}")]
    Unsorted { prev: u16, next: u16 },
    #[error("duplicate attribute handle {0:#06x}")]
    Duplicate(u16),
    #[error("initial value of {handle:#06x} exceeds its capacity")]
    ValueTooLong { handle: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
}

impl Permissions {
    pub const READ: Self = Self { read: true, write: false };
    pub const WRITE: Self = Self { read: false, write: true };
    pub const READ_WRITE: Self = Self { read: true, write: true };
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub handle: u16,
    pub attr_type: u16,
    pub perms: Permissions,
    /// Largest value a write may store
    pub capacity: usize,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Read-only attribute whose value never changes
    pub fn fixed(handle: u16, attr_type: u16, value: Vec<u8>) -> Self {
        Self {
            handle,
            attr_type,
            perms: Permissions::READ,
            capacity: value.len(),
            value,
        }
    }

    pub fn value(handle: u16, perms: Permissions, capacity: usize) -> Self {
        Self {
            handle,
            attr_type: attr_type::CHARACTERISTIC_VALUE,
            perms,
            capacity,
            value: Vec::new(),
        }
    }

    /// Client characteristic configuration descriptor, notifications off
    pub fn cccd(handle: u16) -> Self {
        Self {
            handle,
            attr_type: attr_type::CLIENT_CHAR_CONFIG,
            perms: Permissions::READ_WRITE,
            capacity: 2,
            value: vec![0, 0],
        }
    }
}

#[derive(Debug)]
pub struct AttributeTable {
    attrs: Vec<Attribute>,
}

impl AttributeTable {
    pub fn new(attrs: Vec<Attribute>) -> Result<Self, TableError> {
        for pair in attrs.windows(2) {
            let (prev, next) = (pair[0].handle, pair[1].handle);
            if prev == next {
                return Err(TableError::Duplicate(next));
            }
            if prev > next {
                return Err(TableError::Unsorted { prev, next });
            }
        }
        if let Some(attr) = attrs.iter().find(|a| a.value.len() > a.capacity) {
            return Err(TableError::ValueTooLong { handle: attr.handle });
        }
        Ok(Self { attrs })
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        self.index(handle).map(|i| &self.attrs[i])
    }

    fn index(&self, handle: u16) -> Option<usize> {
        self.attrs.binary_search_by_key(&handle, |a| a.handle).ok()
    }

    /// Serve a read request
    pub fn read(&self, handle: u16, offset: u16, max_len: u16) -> Result<Vec<u8>, GattStatus> {
        let attr = self.get(handle).ok_or(GattStatus::InvalidHandle)?;
        if !attr.perms.read {
            return Err(GattStatus::ReadNotPermitted);
        }
        let offset = usize::from(offset);
        if offset > attr.value.len() {
            return Err(GattStatus::InvalidOffset);
        }
        let end = attr.value.len().min(offset + usize::from(max_len));
        Ok(attr.value[offset..end].to_vec())
    }

    /// Serve a read-by-type request
    ///
    /// The response is a length byte followed by `(handle LE, value)` pairs.
    /// Every pair has the length of the first match; the scan stops at the
    /// first attribute of a different length or when `max_len` is reached.
    pub fn read_by_type(&self, start: u16, end: u16, wanted: u16, max_len: u16) -> Result<Vec<u8>, GattStatus> {
        let max_len = usize::from(max_len);
        if max_len < 3 {
            return Err(GattStatus::InvalidAttrLength);
        }
        let first = self.attrs.partition_point(|a| a.handle < start);
        let mut out = vec![0u8];
        let mut pair_len = None;

        for attr in self.attrs[first..]
            .iter()
            .take_while(|a| a.handle <= end)
            .filter(|a| a.attr_type == wanted && a.perms.read)
        {
            // Pair length travels in one byte
            let len = (attr.value.len() + 2).min(max_len.saturating_sub(1)).min(255);
            match pair_len {
                None => pair_len = Some(len),
                Some(expected) if expected != len => break,
                Some(_) => {}
            }
            if out.len() + len > max_len {
                break;
            }
            out.extend_from_slice(&attr.handle.to_le_bytes());
            out.extend_from_slice(&attr.value[..len - 2]);
        }

        match pair_len {
            Some(len) if out.len() > 1 => {
                out[0] = len as u8;
                Ok(out)
            }
            _ => Err(GattStatus::AttributeNotFound),
        }
    }

    /// Serve a write request
    pub fn write(&mut self, handle: u16, value: &[u8]) -> Result<(), GattStatus> {
        let index = self.index(handle).ok_or(GattStatus::InvalidHandle)?;
        let attr = &mut self.attrs[index];
        if !attr.perms.write {
            return Err(GattStatus::WriteNotPermitted);
        }
        if attr.attr_type == attr_type::CLIENT_CHAR_CONFIG && value.len() != 2 {
            return Err(GattStatus::InvalidAttrLength);
        }
        if value.len() > attr.capacity {
            return Err(GattStatus::InvalidAttrLength);
        }
        attr.value.clear();
        attr.value.extend_from_slice(value);
        Ok(())
    }

    /// Store a value the server itself produced, ignoring write permission
    pub fn set_value(&mut self, handle: u16, value: &[u8]) -> Result<(), GattStatus> {
        let index = self.index(handle).ok_or(GattStatus::InvalidHandle)?;
        let attr = &mut self.attrs[index];
        if value.len() > attr.capacity {
            return Err(GattStatus::InvalidAttrLength);
        }
        attr.value.clear();
        attr.value.extend_from_slice(value);
        Ok(())
    }

    /// Client configuration bits of a CCCD, zero if absent
    pub fn cccd(&self, handle: u16) -> u16 {
        self.get(handle)
            .filter(|a| a.attr_type == attr_type::CLIENT_CHAR_CONFIG)
            .and_then(|a| a.value.get(..2))
            .map(|v| u16::from_le_bytes([v[0], v[1]]))
            .unwrap_or(0)
    }

    /// Reset every CCCD, as on disconnect from a non-bonded client
    pub fn clear_cccds(&mut self) {
        for attr in &mut self.attrs {
            if attr.attr_type == attr_type::CLIENT_CHAR_CONFIG {
                attr.value = vec![0, 0];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> AttributeTable {
        AttributeTable::new(vec![
            Attribute::fixed(0x0001, attr_type::PRIMARY_SERVICE, vec![0x00, 0x18]),
            Attribute::fixed(0x0002, attr_type::CHARACTERISTIC, vec![0x0a, 0x03, 0x00, 0x00, 0x2a]),
            Attribute::value(0x0003, Permissions::READ_WRITE, 8),
            Attribute::cccd(0x0004),
            Attribute::fixed(0x0005, attr_type::CHARACTERISTIC, vec![0x12, 0x06, 0x00, 0x01, 0x2a]),
            Attribute::value(0x0006, Permissions::WRITE, 4),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_unsorted_and_duplicate_handles() {
        let unsorted = AttributeTable::new(vec![Attribute::cccd(5), Attribute::cccd(3)]);
        assert!(matches!(unsorted, Err(TableError::Unsorted { prev: 5, next: 3 })));
        let dup = AttributeTable::new(vec![Attribute::cccd(5), Attribute::cccd(5)]);
        assert!(matches!(dup, Err(TableError::Duplicate(5))));
    }

    #[test]
    fn read_respects_offset_and_permissions() {
        let mut table = table();
        table.write(0x0003, b"abcdef").unwrap();
        assert_eq!(table.read(0x0003, 2, 3).unwrap(), b"cde");
        assert_eq!(table.read(0x0003, 6, 10).unwrap(), b"");
        assert_eq!(table.read(0x0003, 7, 10), Err(GattStatus::InvalidOffset));
        assert_eq!(table.read(0x0006, 0, 10), Err(GattStatus::ReadNotPermitted));
        assert_eq!(table.read(0x0099, 0, 10), Err(GattStatus::InvalidHandle));
    }

    #[test]
    fn write_checks_capacity_and_cccd_length() {
        let mut table = table();
        assert_eq!(table.write(0x0006, b"12345"), Err(GattStatus::InvalidAttrLength));
        assert_eq!(table.write(0x0004, &[1]), Err(GattStatus::InvalidAttrLength));
        assert_eq!(table.write(0x0001, &[1]), Err(GattStatus::WriteNotPermitted));
        table.write(0x0004, &[1, 0]).unwrap();
        assert_eq!(table.cccd(0x0004), 1);
        table.clear_cccds();
        assert_eq!(table.cccd(0x0004), 0);
    }

    #[test]
    fn read_by_type_packs_uniform_pairs() {
        let table = table();
        let out = table.read_by_type(0x0001, 0xffff, attr_type::CHARACTERISTIC, 64).unwrap();
        assert_eq!(out[0], 7);
        assert_eq!(out.len(), 1 + 7 * 2);
        assert_eq!(&out[1..3], &[0x02, 0x00]);
        assert_eq!(&out[8..10], &[0x05, 0x00]);

        let truncated = table.read_by_type(0x0001, 0xffff, attr_type::CHARACTERISTIC, 10).unwrap();
        assert_eq!(truncated.len(), 8);

        assert_eq!(
            table.read_by_type(0x0003, 0x0004, attr_type::PRIMARY_SERVICE, 64),
            Err(GattStatus::AttributeNotFound)
        );
    }
}
