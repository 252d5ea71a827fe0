// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The block transform applied to every packet before it is sent back.

use zerocopy::LayoutVerified;

/// Inverts every bit of every whole 4-byte word in `block`, in place.
///
/// A trailing 1-3 bytes that do not make up a whole word are left alone.
/// Packet buffers are word aligned, so this normally runs over `u32`s; an
/// unaligned slice gets the same result a byte at a time.
pub fn invert_words(block: &mut [u8]) {
    let whole = block.len() & !3;
    let body = &mut block[..whole];
    match LayoutVerified::<_, [u32]>::new_slice(&mut *body) {
        Some(words) => {
            for w in words.into_mut_slice() {
                *w = !*w;
            }
        }
        None => {
            for b in body {
                *b = !*b;
            }
        }
    }
}
