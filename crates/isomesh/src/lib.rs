//! # isomesh
//!
//! Contract-described services on a peer-to-peer mesh. A node registers local
//! implementations with its `Services` registry; peers learn about them through
//! advertisements and call them through the same `Reflect` interface a local caller
//! uses, typed or by name.
//!
//! ```ignore
//! const HELLO: Method<(String,), String> = Method::new("hello");
//!
//! let contract = ServiceContract::builder("TestService").method(&HELLO)?.build();
//! let reflect = contract.implement("test", Implementation::new()
//!     .method(&HELLO, |(what,)| async move { Ok(format!("Hello {}!", what)) }))?;
//!
//! let services = Services::new(hub.node("a"));
//! services.register(reflect)?;
//! services.join().await?;
//! ```

pub mod args;
pub mod config;
pub mod contract;
pub mod descriptor;
pub mod error;
pub mod handle;
pub mod local;
pub mod memory;
pub mod network;
pub mod proxy;
pub mod reflect;
pub mod registry;
pub mod remote;
pub mod types;
pub mod wire;

mod outbox;
mod pending;

pub use args::FromArgs;
pub use args::IntoArgs;
pub use args::ParamTypes;
pub use config::Config;
pub use config::ConfigBuilder;
pub use contract::Contract;
pub use contract::ContractBuilder;
pub use contract::Event;
pub use contract::Implementation;
pub use contract::Method;
pub use contract::ServiceContract;
pub use descriptor::EventDescriptor;
pub use descriptor::MethodDescriptor;
pub use descriptor::Shape;
pub use error::Error;
pub use error::Result;
pub use handle::ServiceHandle;
pub use local::Emitter;
pub use local::LocalReflect;
pub use memory::MemoryHub;
pub use memory::MemoryNode;
pub use network::Network;
pub use network::NetworkEvent;
pub use proxy::Proxy;
pub use reflect::Listener;
pub use reflect::Location;
pub use reflect::Reflect;
pub use registry::Availability;
pub use registry::Services;
pub use registry::State;
pub use remote::RemoteReflect;
pub use types::NodeId;
pub use types::ServiceId;
pub use types::Type;
pub use types::Typed;
pub use types::Value;
