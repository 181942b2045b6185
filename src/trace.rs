//! Instrumented tracing: one line per syntax structure entered, one line
//! per syntax element read or written. Purely an observability concern —
//! enabling it never changes a decoded value or an emitted byte.

use crate::Context;

/// Prints a name line at the start of a syntactic structure (e.g. a call
/// to `sequence_header`), mirroring the element trace below it.
pub fn trace_header(ctx: &Context, name: &str) {
    if !ctx.trace_enabled() {
        return;
    }
    ctx.trace(log::Level::Trace, &format!("{}", name));
}

/// Prints one line per primitive: the bit position it started at, its
/// name, a `'0'`/`'1'` rendering of the bits consumed, and the decoded
/// value. The bits column right-pads the name to column 61 unless
/// `name.len() + bits.len()` would overflow that width, in which case it
/// right-aligns the bits immediately after the name with a two-space gap.
pub fn trace_syntax_element(ctx: &Context, position: u64, name: &str, bits: &str, value: i64) {
    if !ctx.trace_enabled() {
        return;
    }
    let pad = if name.len() + bits.len() > 60 {
        bits.len() + 2
    } else {
        61usize.saturating_sub(name.len())
    };
    ctx.trace(
        log::Level::Trace,
        &format!("{:<10} {}{:>pad$} = {}", position, name, bits, value, pad = pad),
    );
}

/// Renders `n` bits of `value` (MSB-first) as a string of `'0'`/`'1'`.
pub fn bits_to_string(value: u64, n: u32) -> String {
    (0..n)
        .rev()
        .map(|i| if (value >> i) & 1 == 1 { '1' } else { '0' })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn renders_bit_string_msb_first() {
        assert_eq!(bits_to_string(0b1010, 4), "1010");
        assert_eq!(bits_to_string(0b1, 1), "1");
        assert_eq!(bits_to_string(0, 3), "000");
    }
}
