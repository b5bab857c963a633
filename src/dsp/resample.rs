//! Linear-interpolation resampling between the telephony rate and the AI
//! dialect rates.
//!
//! The caller leg is 8 kHz in and 8 kHz out, so none of this sits on the
//! audio-correctness critical path; it serves the higher-rate AI dialect and
//! the lip-sync fork. Linear interpolation is sufficient at these rates.
//!
//! All routines are stateless: the 2x upsampler duplicates its first sample
//! instead of carrying history across calls, accepting a one-sample
//! discontinuity at chunk borders to keep call sites free of shared state.

/// 8 kHz -> 24 kHz (3x). For each input pair `(s0, s1)` emits
/// `s0, (2*s0 + s1) / 3, (s0 + 2*s1) / 3`; the final sample is tripled.
pub fn upsample_8k_to_24k(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 3);
    for (i, &s0) in input.iter().enumerate() {
        let s0 = s0 as i32;
        let s1 = input.get(i + 1).map(|&s| s as i32).unwrap_or(s0);
        out.push(s0 as i16);
        out.push(((2 * s0 + s1) / 3) as i16);
        out.push(((s0 + 2 * s1) / 3) as i16);
    }
    out
}

/// 24 kHz -> 16 kHz (2/3). Output length is `input.len() * 2 / 3`; each
/// output sample interpolates at source position `i * 1.5`.
pub fn downsample_24k_to_16k(input: &[i16]) -> Vec<i16> {
    let out_len = input.len() * 2 / 3;
    let mut out = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src = i as f32 * 1.5;
        let idx = src as usize;
        let frac = src - idx as f32;
        let a = input[idx] as f32;
        let b = input.get(idx + 1).map(|&s| s as f32).unwrap_or(a);
        out.push((a + (b - a) * frac) as i16);
    }
    out
}

/// 8 kHz -> 16 kHz (2x). `out[2i]` averages the previous and current input
/// sample, `out[2i+1]` is the current sample. The first sample has no
/// predecessor and is duplicated.
pub fn upsample_8k_to_16k(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() * 2);
    for (i, &s) in input.iter().enumerate() {
        let mid = if i == 0 {
            s as i32
        } else {
            (input[i - 1] as i32 + s as i32) / 2
        };
        out.push(mid as i16);
        out.push(s);
    }
    out
}

/// 24 kHz -> 8 kHz (1/3) by averaging sample triples. Brings AI PCM down to
/// the G.711 rate in the PCM egress mode. A trailing partial triple is
/// averaged over its actual length.
pub fn downsample_24k_to_8k(input: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(input.len() / 3 + 1);
    for chunk in input.chunks(3) {
        let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
        out.push((sum / chunk.len() as i32) as i16);
    }
    out
}
