//! Client for the Dubbo RPC protocol, restricted to generic invocation
//! (`$invokeWithJsonArgs`): the caller supplies a service, a method and a
//! JSON argument vector, and gets the JSON result back.
//!
//! Two execution modes are provided: a single blocking call ([`sync`]) and a
//! pipelined bench mode ([`client`]) that keeps a configured number of
//! requests in flight over one persistent connection and reports throughput.

pub mod shared;

pub mod logging;

pub mod buffer;
pub mod hessian;

pub mod frame;
pub mod codec;

pub mod client;
pub mod sync;
