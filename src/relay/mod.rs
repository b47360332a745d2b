// Mutation relay module
//
// Update and delete requests do not go straight to the backend. The gateway
// encodes them and publishes them to a fixed topic per (entity, operation);
// the backend subscribes to those topics and applies each command through
// its storage layer.
//
// Data flow:
// =========
//
//   Relay::submit ─► codec::encode ─► Publisher ─► [broker topic]
//                                                        │
//   Store ◄─ MutationHandler ◄─ codec::decode ◄─ ConsumerRuntime ◄─ MessageStream
//
// The SubscriptionRegistry owns one ConsumerRuntime per (topic, group) and
// refuses duplicates. Delivery is at-least-once: commit happens after apply,
// and handlers rely on update and soft-delete being idempotent.
//
// Ordering is per partition only. Unless order_by_entity is enabled, two
// updates of the same row may be applied out of publish order.

pub mod codec;
pub mod command;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod handlers;
pub mod memory;
pub mod publisher;
pub mod registry;
pub mod source;
pub mod storage;
pub mod submit;
pub mod topic;

// Re-export commonly used types for convenience
pub use command::{EntityKind, FieldKind, FieldMap, FieldValue, MutationCommand, Operation, Route};
pub use consumer::{ConsumerRuntime, FailurePolicy, RuntimeSettings, RuntimeState, StatsSnapshot};
pub use error::{RelayError, Result};
pub use handlers::{standard_bindings, ApplyOutcome, Binding, MutationHandler, StoreHandler};
pub use memory::MemoryBroker;
pub use publisher::{KafkaPublisher, KafkaPublisherBuilder, OutboundRecord, PublishReceipt, Publisher};
pub use registry::{ShutdownReport, SubscriptionRegistry};
pub use source::{InboundMessage, KafkaSource, MessageSource, MessageStream};
pub use storage::{MemoryStore, PostgresStore, Row, Store, StoreAck};
pub use submit::{Accepted, Relay};
