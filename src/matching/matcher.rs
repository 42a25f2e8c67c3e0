use crate::matching::config::{EmptyRuleSetPolicy, MatchConfig, GENERAL_LABEL, GENERAL_ROUTING_KEY};
use crate::matching::text::{contains_either_way, is_browser, shares_a_word, url_host};
use crate::models::{AllowlistRule, CaptureDecision, ContextSnapshot, RuleKind, RuleSet};

/// Pure allowlist matcher. Holds configuration only, never rule state.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    config: MatchConfig,
}

impl Matcher {
    pub fn new(config: MatchConfig) -> Self {
        Self { config }
    }

    /// Evaluate `context` against `rules` in server order; the first matching
    /// active rule decides the routing key and label.
    pub fn evaluate(&self, context: &ContextSnapshot, rules: &RuleSet) -> CaptureDecision {
        if rules.is_empty() {
            return match self.config.empty_rule_set {
                EmptyRuleSetPolicy::CaptureNothing => CaptureDecision::skip(),
                EmptyRuleSetPolicy::CaptureAll => {
                    CaptureDecision::capture(GENERAL_ROUTING_KEY, GENERAL_LABEL)
                }
            };
        }

        rules
            .rules()
            .iter()
            .filter(|rule| rule.active)
            .find(|rule| self.rule_matches(rule, context))
            .map(|rule| CaptureDecision::capture(rule.routing_key.clone(), rule.pattern.clone()))
            .unwrap_or_else(CaptureDecision::skip)
    }

    pub fn is_browser(&self, application_name: &str) -> bool {
        is_browser(application_name, &self.config.browsers)
    }

    fn rule_matches(&self, rule: &AllowlistRule, context: &ContextSnapshot) -> bool {
        match rule.kind {
            RuleKind::Application => self.application_matches(&rule.pattern, &context.application_name),
            RuleKind::Url => self.url_matches(&rule.pattern, context),
        }
    }

    fn application_matches(&self, pattern: &str, application_name: &str) -> bool {
        // OS process names often differ from product names ("Code" vs
        // "Visual Studio Code"), hence the word-set fallback.
        contains_either_way(pattern, application_name)
            || shares_a_word(pattern, application_name, &self.config.stopwords)
    }

    fn url_matches(&self, pattern: &str, context: &ContextSnapshot) -> bool {
        if !self.is_browser(&context.application_name) {
            return false;
        }
        let host = url_host(pattern);
        if host.is_empty() {
            return false;
        }
        context.window_title.to_lowercase().contains(&host)
    }
}

/// Match with the default policy (empty rule set captures nothing).
pub fn match_context(context: &ContextSnapshot, rules: &RuleSet) -> CaptureDecision {
    Matcher::default().evaluate(context, rules)
}
