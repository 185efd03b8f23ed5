//! Circular index arithmetic and sizing helpers.

/// `(a + b) mod capacity`.
#[inline]
pub fn index_add(a: usize, b: usize, capacity: usize) -> usize {
    debug_assert!(capacity > 0);
    let s = a + b;
    if s >= capacity { s % capacity } else { s }
}

/// Forward distance from position `b` (a reader) to position `a` (the writer).
#[inline]
pub fn index_sub(a: usize, b: usize, capacity: usize) -> usize {
    debug_assert!(a < capacity && b < capacity);
    if a >= b { a - b } else { capacity - b + a }
}

/// Greatest common divisor. `gcd(0, n) == n`.
pub fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Least common multiple, treating zero as one.
pub fn lcm(a: usize, b: usize) -> usize {
    let (a, b) = (a.max(1), b.max(1));
    a / gcd(a, b) * b
}

/// Round `n` up to the next multiple of `multiple` (zero treated as one).
pub fn round_up_to_multiple(n: usize, multiple: usize) -> usize {
    n.div_ceil(multiple.max(1)) * multiple.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_add_wraps() {
        assert_eq!(index_add(3, 4, 16), 7);
        assert_eq!(index_add(12, 4, 16), 0);
        assert_eq!(index_add(15, 15, 16), 14);
    }

    #[test]
    fn test_index_sub_is_forward_distance() {
        assert_eq!(index_sub(10, 4, 16), 6);
        assert_eq!(index_sub(2, 14, 16), 4);
        assert_eq!(index_sub(5, 5, 16), 0);
    }

    #[test]
    fn test_add_then_sub_recovers_offset() {
        let capacity = 13;
        for a in 0..capacity {
            for b in 0..capacity {
                let r = index_add(a, b, capacity);
                assert_eq!(index_sub(r, a, capacity), b);
            }
        }
    }

    #[test]
    fn test_lcm_and_rounding() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(lcm(4, 6), 12);
        assert_eq!(lcm(0, 5), 5);
        assert_eq!(lcm(1, 1), 1);
        assert_eq!(round_up_to_multiple(100, 12), 108);
        assert_eq!(round_up_to_multiple(96, 12), 96);
        assert_eq!(round_up_to_multiple(7, 0), 7);
    }
}
