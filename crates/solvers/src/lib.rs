//! Pure protocol logic for the `opinion-validator`: value types, the dispute graph, the pending
//! inbox, and the solvers that classify and build assertions.

pub mod rollup;
