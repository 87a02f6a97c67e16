// Cross-cutting prompt fragments. Template skeletons live in analysis::prompts.

/// Fixed system instruction sent with every analysis call.
pub const ANALYST_SYSTEM: &str = "You are an expert ATS consultant and career coach \
    providing detailed, actionable resume analysis. \
    Be specific, comprehensive, and professional.";
