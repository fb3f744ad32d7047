//! Отложенная, реентерабельно-безопасная шина publish/subscribe.
//!
//! - `bus`: контекстный объект [`Bus`], публикация, подписки, уровень и дренаж.
//! - `channel`: имена каналов (строка или ненулевое число).
//! - `message`: конверт сообщения `{channel, kind?, payload}`.
//! - `subscriber`: callback, фильтры, продолжения и handle подписок.
//! - `compactor`: слияние сообщений одного типа в очереди канала.
//! - `trigger`: отложенный запуск планировщика (tokio `LocalSet` или явная
//!   очередь готовых задач).
//! - `gate`, `registry`, `scheduler`, `intern` (приватные): счётчик уровня,
//!   состояние каналов, шаг доставки и интернирование имён.

pub mod bus;
pub mod channel;
pub mod compactor;
mod gate;
mod intern;
pub mod message;
mod registry;
mod scheduler;
pub mod subscriber;
pub mod trigger;

pub use bus::*;
pub use channel::*;
pub use compactor::{keep_existing, merge_into_existing, Compactor, Survivor};
pub(crate) use intern::intern_channel;
pub use message::*;
pub use subscriber::*;
pub use trigger::*;
