//! Byte-size helpers.

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Render a byte count in IEC units: `0 B`, `512 B`, `4 KiB`, `1.50 MiB`.
pub fn iec(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    if bytes < KIB {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

pub fn round_up(value: u64, block: u64) -> u64 {
    if block == 0 {
        return value;
    }
    value.div_ceil(block) * block
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iec_rendering() {
        assert_eq!(iec(0), "0 B");
        assert_eq!(iec(440), "440 B");
        assert_eq!(iec(4096), "4 KiB");
        assert_eq!(iec(MIB + MIB / 2), "1.50 MiB");
        assert_eq!(iec(3 * GIB), "3 GiB");
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4096), 0);
        assert_eq!(round_up(1, 4096), 4096);
        assert_eq!(round_up(4096, 4096), 4096);
        assert_eq!(round_up(4097, 4096), 8192);
        assert_eq!(round_up(7, 0), 7);
    }
}
