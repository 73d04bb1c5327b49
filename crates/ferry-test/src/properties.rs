//! Property suite
//!
//! Random interleavings of distribute, revoke, external destroy and idle
//! ticks, checking that each (source, subscriber) pair never holds more
//! than one live clone and that records agree with what is on screen.
