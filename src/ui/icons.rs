//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[ERR]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");

// Run indicators
pub static BATCH: Emoji<'_, '_> = Emoji("🌊 ", "[B]");
pub static PHASE: Emoji<'_, '_> = Emoji("▶️  ", "[>]");
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "[!]");
pub static STOP: Emoji<'_, '_> = Emoji("🛑 ", "[STOP]");
pub static COST: Emoji<'_, '_> = Emoji("💰 ", "$");
