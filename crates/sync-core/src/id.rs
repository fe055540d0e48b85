//! Note id generation.

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of generated note ids.
pub const NOTE_ID_LEN: usize = 10;

/// A random id of [`NOTE_ID_LEN`] characters from `[A-Za-z0-9]`.
///
/// Uniqueness against existing notes is the caller's job; see
/// `SyncOrchestrator::gen_new_id`.
pub fn gen_note_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(NOTE_ID_LEN)
        .map(char::from)
        .collect()
}
