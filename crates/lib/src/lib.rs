//! dingbridge core library: DingTalk channel, AI webhook generation, gateway and config
//! used by the CLI.

pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod llm;
