pub struct Icons;

impl Icons {
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const INFO: &str = "ℹ️";
    pub const DATABASE: &str = "🗄️";
    pub const OBJECT: &str = "📦";
    pub const SEARCH: &str = "🔍";
    pub const DEL: &str = "🗑️";
}
