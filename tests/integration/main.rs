//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises the client against the
//! mock adapters in [`mock_io`].  All tests run on the host (x86_64) with
//! no radio, DTLS stack or LEDs required.

mod client_flow_tests;
mod device_tasks_tests;
mod mock_io;
