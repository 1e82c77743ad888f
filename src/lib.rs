// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The real-time streaming playback pipeline of a headless network audio
//! player daemon (spec §1): a three-stage producer/consumer chain — HTTP
//! feeder, decoder, audio sink — connected by bounded ring buffers, driven
//! by a playlist [`queue::Queue`] and a [`controller::Controller`] state
//! machine.
//!
//! The remote-control message layer, on-disk configuration persistence, the
//! CLI, and the visual status surface are out of scope here; they are
//! external collaborators that consume this crate's [`controller::Controller`]
//! command surface (spec §6) and the wire types in `netplayer-proto`.

pub mod controller;
pub mod decoder;
pub mod feeder;
pub mod fifo;
pub mod format;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod track;
