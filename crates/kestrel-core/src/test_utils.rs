//! Shared checks for [`KernelEvent`] decoders.

use bpf_common::{bytes::Bytes, parsing::RawDecoder};

use crate::pdk::{DecodeState, EventError, KernelEvent, Verdict};

/// Decode a whole record payload into a fresh `E`.
///
/// A successful decode must consume every byte of the payload.
pub fn decode_exactly<E: KernelEvent + Default>(
    payload: Bytes,
    state: &DecodeState,
) -> (E, Result<Verdict, EventError>) {
    let mut event = E::default();
    let mut decoder = RawDecoder::new(payload);
    let verdict = event.decode(&mut decoder, state);
    if verdict.is_ok() {
        assert!(
            decoder.is_exhausted(),
            "{}: {} bytes left over",
            event.name(),
            decoder.remaining()
        );
    }
    (event, verdict)
}

/// Decode every strict prefix of `payload`, each with a state from `state`,
/// and require all of them to fail as truncated.
pub fn assert_truncated_at_every_length<E: KernelEvent + Default>(
    payload: &Bytes,
    state: impl Fn() -> DecodeState,
) {
    for len in 0..payload.len() {
        let mut event = E::default();
        let mut decoder = RawDecoder::new(payload.slice(..len));
        match event.decode(&mut decoder, &state()) {
            Err(err) => assert!(
                err.is_truncation(),
                "{} cut at {len}/{}: {err}",
                event.name(),
                payload.len()
            ),
            Ok(verdict) => panic!(
                "{} cut at {len}/{} decoded as {verdict:?}",
                event.name(),
                payload.len()
            ),
        }
    }
}
