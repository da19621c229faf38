use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::object::Object;

/// Storage for the fields of an object or the static fields of a class.
/// Primitive fields each take one 64-bit slot, references live in a separate table.
pub(crate) struct FieldStorage {
    primitives: Box<[AtomicU64]>,
    references: Box<[RwLock<Option<Object>>]>,
}

fn ordering(volatile: bool) -> Ordering {
    if volatile {
        Ordering::SeqCst
    } else {
        Ordering::Relaxed
    }
}

macro_rules! access {
    ($read:ident, $write:ident, $typ:ty, $to_bits:expr, $from_bits:expr) => {
        pub fn $read(&self, slot: u32, volatile: bool) -> Option<$typ> {
            let bits = self.primitives.get(slot as usize)?.load(ordering(volatile));
            Some($from_bits(bits))
        }

        pub fn $write(&self, slot: u32, value: $typ, volatile: bool) -> Option<()> {
            self.primitives
                .get(slot as usize)?
                .store($to_bits(value), ordering(volatile));
            Some(())
        }
    };
}

impl FieldStorage {
    pub fn new(primitives: usize, references: usize) -> Self {
        Self {
            primitives: (0..primitives).map(|_| AtomicU64::new(0)).collect(),
            references: (0..references).map(|_| RwLock::new(None)).collect(),
        }
    }

    access!(read_i32, write_i32, i32, |v: i32| v as u32 as u64, |b: u64| b as u32 as i32);
    access!(read_i64, write_i64, i64, |v: i64| v as u64, |b: u64| b as i64);
    access!(read_f32, write_f32, f32, |v: f32| v.to_bits() as u64, |b: u64| f32::from_bits(b as u32));
    access!(read_f64, write_f64, f64, |v: f64| v.to_bits(), f64::from_bits);

    pub fn read_ref(&self, slot: u32) -> Option<Option<Object>> {
        Some(self.references.get(slot as usize)?.read().clone())
    }

    pub fn write_ref(&self, slot: u32, value: Option<Object>) -> Option<()> {
        *self.references.get(slot as usize)?.write() = value;
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_hold_their_bits() {
        let storage = FieldStorage::new(3, 1);
        storage.write_i32(0, -5, false).unwrap();
        storage.write_f64(1, -0.5, true).unwrap();
        storage.write_f32(2, f32::NAN, false).unwrap();
        assert_eq!(storage.read_i32(0, false), Some(-5));
        assert_eq!(storage.read_f64(1, true), Some(-0.5));
        assert!(storage.read_f32(2, false).unwrap().is_nan());
        assert_eq!(storage.read_ref(0), Some(None));
        assert_eq!(storage.read_i64(3, false), None);
        assert_eq!(storage.write_ref(1, None), None);
    }
}
