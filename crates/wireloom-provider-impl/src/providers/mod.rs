//! Concrete `Provider` implementations: Anthropic-wire passthrough and
//! OpenAI-wire, each usable with either a static-key rotator or an OAuth
//! token manager as its credential source.

pub mod anthropic_wire;
pub mod openai_wire;
