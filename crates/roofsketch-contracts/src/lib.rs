pub mod credentials;
pub mod events;
pub mod history;
pub mod material;
pub mod payload;
pub mod prompt;
pub mod shell;
