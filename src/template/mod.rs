//! Template processor for subject and body rendering.
//!
//! Placeholder syntax is `[[key]]` or `[[key || fallback]]`, keys
//! case-insensitive. Keys bind to the flattened lead attributes merged with
//! any custom variables; a handful of "special" keys resolve through
//! runtime-dispatched functions ([`SpecialVar`]). Resolution order per
//! occurrence:
//!
//! 1. lead/custom variable
//! 2. special function
//! 3. fallback literal
//! 4. empty string (or the configured replacement in strict mode)
//!
//! Rendering is deterministic for non-AI keys given the same inputs and
//! clock; the clock is passed in through [`RenderContext`] rather than read
//! ambiently.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::LeadRecord;

/// Static opener used whenever the AI call is unavailable or fails.
pub const AI_OPENER_FALLBACK: &str = "Hi! Let's connect.";

/// Source of AI-generated opener lines, dispatched behind the `aiOpener`
/// special variable.
#[async_trait]
pub trait OpenerSource: Send + Sync {
    async fn opener(&self, lead: &LeadRecord) -> Result<String>;
}

/// Per-render inputs for special-variable resolution.
pub struct RenderContext<'a> {
    /// Base URL for unsubscribe links.
    pub base_url: Option<&'a str>,
    /// The lead being rendered, when available.
    pub lead: Option<&'a LeadRecord>,
    /// Clock for the date/time special variables.
    pub now: DateTime<Utc>,
    /// AI opener source, when configured.
    pub ai: Option<&'a dyn OpenerSource>,
}

impl<'a> RenderContext<'a> {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            base_url: None,
            lead: None,
            now,
            ai: None,
        }
    }
}

/// Case-insensitive variable namespace.
#[derive(Debug, Clone, Default)]
pub struct Variables {
    map: HashMap<String, String>,
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a lead (with enrichment) into the namespace. Absent
    /// attributes stay unbound so their placeholders fall through to
    /// fallbacks. Name-like fields also get a title-cased `t*` variant.
    pub fn from_lead(lead: &LeadRecord) -> Self {
        let mut vars = Self::new();
        vars.set("id", &lead.id);
        vars.set("email", &lead.email);
        vars.set_opt("firstname", lead.first_name.as_deref());
        vars.set_opt("lastname", lead.last_name.as_deref());
        vars.set_opt("jobtitle", lead.job_title.as_deref());
        vars.set_opt("companyname", lead.company_name.as_deref());
        vars.set_opt("industry", lead.industry.as_deref());
        vars.set_opt("companysize", lead.company_size.as_deref());
        vars.set_opt("country", lead.country.as_deref());
        vars.set_opt("state", lead.state.as_deref());
        vars.set_opt("address", lead.address.as_deref());
        vars.set_opt("linkedinurl", lead.linkedin_url.as_deref());
        vars.set_opt("source", lead.source.as_deref());

        let full_name = [lead.first_name.as_deref(), lead.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if !full_name.is_empty() {
            vars.set("fullname", &full_name);
        }

        for key in [
            "firstname",
            "lastname",
            "fullname",
            "jobtitle",
            "companyname",
            "industry",
            "country",
            "state",
        ] {
            if let Some(value) = vars.map.get(key).cloned() {
                vars.set(&format!("t{}", key), &title_case(&value));
            }
        }

        vars
    }

    /// Bind a variable; keys are lowered so lookups stay case-insensitive.
    pub fn set(&mut self, key: &str, value: &str) {
        self.map.insert(key.to_lowercase(), value.to_string());
    }

    fn set_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            if !value.trim().is_empty() {
                self.set(key, value);
            }
        }
    }

    /// Merge custom variables into the namespace; custom values win.
    pub fn merge(&mut self, custom: &HashMap<String, String>) {
        for (key, value) in custom {
            self.set(key, value);
        }
    }

    fn get(&self, key_lower: &str) -> Option<&str> {
        self.map.get(key_lower).map(String::as_str)
    }
}

/// Special keys resolved through runtime-dispatched functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialVar {
    Unsubscribe,
    CurrentDate,
    CurrentYear,
    CurrentMonth,
    CurrentDay,
    AiOpener,
}

impl SpecialVar {
    pub fn parse(key_lower: &str) -> Option<Self> {
        match key_lower {
            "unsubscribe" => Some(SpecialVar::Unsubscribe),
            "currentdate" => Some(SpecialVar::CurrentDate),
            "currentyear" => Some(SpecialVar::CurrentYear),
            "currentmonth" => Some(SpecialVar::CurrentMonth),
            "currentday" => Some(SpecialVar::CurrentDay),
            "aiopener" => Some(SpecialVar::AiOpener),
            _ => None,
        }
    }

    /// Resolve against the render context. `None` means the special could
    /// not produce a value and the placeholder falls through to its
    /// fallback.
    async fn resolve(&self, ctx: &RenderContext<'_>) -> Option<String> {
        match self {
            SpecialVar::Unsubscribe => {
                let base_url = ctx.base_url?;
                let lead_id = ctx.lead.map(|l| l.id.as_str()).filter(|id| !id.is_empty())?;
                Some(format!("{}unsubscribe/{}", base_url, lead_id))
            }
            SpecialVar::CurrentDate => Some(ctx.now.format("%Y-%m-%d").to_string()),
            SpecialVar::CurrentYear => Some(ctx.now.format("%Y").to_string()),
            SpecialVar::CurrentMonth => Some(ctx.now.format("%m").to_string()),
            SpecialVar::CurrentDay => Some(ctx.now.format("%d").to_string()),
            SpecialVar::AiOpener => {
                let (Some(ai), Some(lead)) = (ctx.ai, ctx.lead) else {
                    return Some(AI_OPENER_FALLBACK.to_string());
                };
                match ai.opener(lead).await {
                    Ok(opener) if !opener.trim().is_empty() => Some(opener),
                    Ok(_) => Some(AI_OPENER_FALLBACK.to_string()),
                    Err(e) => {
                        tracing::warn!("AI opener failed, using fallback: {}", e);
                        Some(AI_OPENER_FALLBACK.to_string())
                    }
                }
            }
        }
    }
}

/// The `[[key || fallback]]` substitution engine.
#[derive(Debug, Clone)]
pub struct TemplateProcessor {
    allow_undefined: bool,
    replacement: String,
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self {
            allow_undefined: true,
            replacement: String::new(),
        }
    }
}

impl TemplateProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strict mode: unresolved placeholders without a fallback become
    /// `replacement` instead of the empty string.
    pub fn strict(replacement: impl Into<String>) -> Self {
        Self {
            allow_undefined: false,
            replacement: replacement.into(),
        }
    }

    /// Substitute every placeholder in `template`.
    pub async fn render(
        &self,
        template: &str,
        vars: &Variables,
        ctx: &RenderContext<'_>,
    ) -> String {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("[[") {
            output.push_str(&rest[..open]);
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("]]") else {
                // Unterminated marker, emit verbatim.
                output.push_str(&rest[open..]);
                rest = "";
                break;
            };

            let inner = &after_open[..close];
            let (raw_key, fallback) = match inner.split_once("||") {
                Some((key, fallback)) => (key.trim(), Some(fallback.trim())),
                None => (inner.trim(), None),
            };

            let resolved = self.resolve_one(raw_key, fallback, vars, ctx).await;
            output.push_str(&resolved);
            rest = &after_open[close + 2..];
        }

        output.push_str(rest);
        output
    }

    async fn resolve_one(
        &self,
        raw_key: &str,
        fallback: Option<&str>,
        vars: &Variables,
        ctx: &RenderContext<'_>,
    ) -> String {
        let key = raw_key.to_lowercase();

        if let Some(value) = vars.get(&key) {
            return value.to_string();
        }

        if let Some(special) = SpecialVar::parse(&key) {
            if let Some(value) = special.resolve(ctx).await {
                return value;
            }
        }

        if let Some(fallback) = fallback {
            return fallback.to_string();
        }

        if self.allow_undefined {
            String::new()
        } else {
            self.replacement.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_lead() -> LeadRecord {
        LeadRecord {
            id: "lead-1".to_string(),
            email: "ada@acme.io".to_string(),
            first_name: Some("ada".to_string()),
            last_name: Some("lovelace".to_string()),
            job_title: Some("engineer".to_string()),
            company_name: Some("acme corp".to_string()),
            industry: None,
            country: Some("UK".to_string()),
            state: None,
            address: None,
            linkedin_url: None,
            source: None,
            is_subscribed_to_email: true,
            is_email_valid: "VALID".to_string(),
            company_size: Some("11-50".to_string()),
        }
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_variable_substitution_is_case_insensitive() {
        let vars = Variables::from_lead(&sample_lead());
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor
            .render("Hi [[FirstName]] from [[COMPANYNAME]]", &vars, &ctx)
            .await;
        assert_eq!(out, "Hi ada from acme corp");
    }

    #[tokio::test]
    async fn test_title_cased_variants() {
        let vars = Variables::from_lead(&sample_lead());
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor
            .render("[[tfirstname]] [[tlastname]] of [[tcompanyname]]", &vars, &ctx)
            .await;
        assert_eq!(out, "Ada Lovelace of Acme Corp");
    }

    #[tokio::test]
    async fn test_fullname_is_composed() {
        let vars = Variables::from_lead(&sample_lead());
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor.render("[[fullname]]", &vars, &ctx).await;
        assert_eq!(out, "ada lovelace");
    }

    #[tokio::test]
    async fn test_fallback_used_for_missing_attribute() {
        let vars = Variables::from_lead(&sample_lead());
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor
            .render("[[industry || your industry]]", &vars, &ctx)
            .await;
        assert_eq!(out, "your industry");
    }

    #[tokio::test]
    async fn test_unknown_key_without_fallback_is_empty() {
        let vars = Variables::new();
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor.render("a[[nope]]b", &vars, &ctx).await;
        assert_eq!(out, "ab");
    }

    #[tokio::test]
    async fn test_strict_mode_replaces_unresolved() {
        let vars = Variables::new();
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::strict("[missing]");

        let out = processor.render("a[[nope]]b", &vars, &ctx).await;
        assert_eq!(out, "a[missing]b");

        // A fallback still wins over the strict replacement.
        let out = processor.render("[[nope || x]]", &vars, &ctx).await;
        assert_eq!(out, "x");
    }

    #[tokio::test]
    async fn test_custom_variables_win_over_lead() {
        let mut vars = Variables::from_lead(&sample_lead());
        let mut custom = HashMap::new();
        custom.insert("FirstName".to_string(), "Grace".to_string());
        vars.merge(&custom);
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor.render("[[firstname]]", &vars, &ctx).await;
        assert_eq!(out, "Grace");
    }

    #[tokio::test]
    async fn test_date_specials_follow_the_context_clock() {
        let vars = Variables::new();
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor
            .render(
                "[[currentDate]] [[currentYear]]-[[currentMonth]]-[[currentDay]]",
                &vars,
                &ctx,
            )
            .await;
        assert_eq!(out, "2026-03-09 2026-03-09");
    }

    #[tokio::test]
    async fn test_unsubscribe_composition_and_fallback() {
        let lead = sample_lead();
        let vars = Variables::new();
        let processor = TemplateProcessor::new();

        let mut ctx = RenderContext::new(fixed_now());
        ctx.base_url = Some("https://app.example.com/");
        ctx.lead = Some(&lead);
        let out = processor.render("[[unsubscribe]]", &vars, &ctx).await;
        assert_eq!(out, "https://app.example.com/unsubscribe/lead-1");

        // Missing base url falls through to the literal fallback.
        let mut ctx = RenderContext::new(fixed_now());
        ctx.lead = Some(&lead);
        let out = processor
            .render("[[unsubscribe || contact us to opt out]]", &vars, &ctx)
            .await;
        assert_eq!(out, "contact us to opt out");
    }

    #[tokio::test]
    async fn test_ai_opener_falls_back_without_a_source() {
        let vars = Variables::new();
        let lead = sample_lead();
        let mut ctx = RenderContext::new(fixed_now());
        ctx.lead = Some(&lead);
        let processor = TemplateProcessor::new();

        let out = processor.render("[[aiOpener]]", &vars, &ctx).await;
        assert_eq!(out, AI_OPENER_FALLBACK);
    }

    struct FailingOpener;

    #[async_trait]
    impl OpenerSource for FailingOpener {
        async fn opener(&self, _lead: &LeadRecord) -> Result<String> {
            Err(crate::error::Error::ExternalService {
                service: "gemini".to_string(),
                message: "boom".to_string(),
            })
        }
    }

    struct StaticOpener(&'static str);

    #[async_trait]
    impl OpenerSource for StaticOpener {
        async fn opener(&self, lead: &LeadRecord) -> Result<String> {
            Ok(format!("{} {}", self.0, lead.id))
        }
    }

    #[tokio::test]
    async fn test_ai_opener_falls_back_on_error() {
        let vars = Variables::new();
        let lead = sample_lead();
        let opener = FailingOpener;
        let mut ctx = RenderContext::new(fixed_now());
        ctx.lead = Some(&lead);
        ctx.ai = Some(&opener);
        let processor = TemplateProcessor::new();

        let out = processor.render("[[aiOpener]]", &vars, &ctx).await;
        assert_eq!(out, AI_OPENER_FALLBACK);
    }

    #[tokio::test]
    async fn test_ai_opener_uses_the_source() {
        let vars = Variables::new();
        let lead = sample_lead();
        let opener = StaticOpener("Saw your work,");
        let mut ctx = RenderContext::new(fixed_now());
        ctx.lead = Some(&lead);
        ctx.ai = Some(&opener);
        let processor = TemplateProcessor::new();

        let out = processor.render("[[aiOpener]]", &vars, &ctx).await;
        assert_eq!(out, "Saw your work, lead-1");
    }

    #[tokio::test]
    async fn test_unterminated_marker_is_left_verbatim() {
        let vars = Variables::new();
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();

        let out = processor.render("hello [[oops", &vars, &ctx).await;
        assert_eq!(out, "hello [[oops");
    }

    #[tokio::test]
    async fn test_render_is_deterministic_for_non_ai_keys() {
        let vars = Variables::from_lead(&sample_lead());
        let ctx = RenderContext::new(fixed_now());
        let processor = TemplateProcessor::new();
        let template = "Hi [[tfirstname]], it is [[currentDate]] at [[companyname]].";

        let a = processor.render(template, &vars, &ctx).await;
        let b = processor.render(template, &vars, &ctx).await;
        assert_eq!(a, b);
        assert_eq!(a, "Hi Ada, it is 2026-03-09 at acme corp.");
    }
}
