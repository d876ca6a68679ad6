use anyhow::{anyhow, Result};
use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use unic_langid::LanguageIdentifier;

/// Languages shipped with the bot, with their Fluent resources
const RESOURCES: &[(&str, &str)] = &[
    ("pt", include_str!("../locales/pt/main.ftl")),
    ("en", include_str!("../locales/en/main.ftl")),
];

/// Localization manager for the Materials Bot
pub struct LocalizationManager {
    bundles: HashMap<String, FluentBundle<FluentResource>>,
    default_language: String,
}

impl LocalizationManager {
    /// Create a localization manager falling back to `default_language`
    pub fn new(default_language: &str) -> Result<Self> {
        let mut bundles = HashMap::new();

        for (language, source) in RESOURCES {
            let locale: LanguageIdentifier = language.parse()?;
            let bundle = Self::create_bundle(&locale, source)?;
            bundles.insert(language.to_string(), bundle);
        }

        if !bundles.contains_key(default_language) {
            return Err(anyhow!("Unsupported default language: {default_language}"));
        }

        Ok(Self {
            bundles,
            default_language: default_language.to_string(),
        })
    }

    /// Create a fluent bundle for a specific locale
    fn create_bundle(
        locale: &LanguageIdentifier,
        source: &str,
    ) -> Result<FluentBundle<FluentResource>> {
        let mut bundle = FluentBundle::new_concurrent(vec![locale.clone()]);
        // Telegram renders the bidi isolation marks literally
        bundle.set_use_isolating(false);

        let resource = FluentResource::try_new(source.to_string())
            .map_err(|(_, errors)| anyhow!("Invalid Fluent resource for {locale}: {errors:?}"))?;
        bundle
            .add_resource(resource)
            .map_err(|errors| anyhow!("Duplicate Fluent messages for {locale}: {errors:?}"))?;

        Ok(bundle)
    }

    /// Map a Telegram language code (e.g. "pt-BR") to a supported language
    pub fn resolve_language<'a>(&'a self, language_code: Option<&str>) -> &'a str {
        language_code
            .and_then(|code| code.split(['-', '_']).next())
            .map(|code| code.to_lowercase())
            .and_then(|code| self.bundles.get_key_value(code.as_str()))
            .map(|(language, _)| language.as_str())
            .unwrap_or(self.default_language.as_str())
    }

    /// Get a localized message in the language closest to `language_code`
    pub fn get_message(
        &self,
        key: &str,
        language_code: Option<&str>,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let language = self.resolve_language(language_code);
        self.get_message_in_language(key, language, args)
    }

    /// Get a localized message in an exact language, falling back to the default one
    pub fn get_message_in_language(
        &self,
        key: &str,
        language: &str,
        args: Option<&HashMap<&str, &str>>,
    ) -> String {
        let bundle = match self
            .bundles
            .get(language)
            .or_else(|| self.bundles.get(&self.default_language))
        {
            Some(bundle) => bundle,
            None => return format!("Missing translation: {key}"),
        };

        let msg = match bundle.get_message(key) {
            Some(msg) => msg,
            None => return format!("Missing translation: {key}"),
        };

        let pattern = match msg.value() {
            Some(pattern) => pattern,
            None => return format!("Missing value for key: {key}"),
        };

        let fluent_args = args.map(|args| {
            FluentArgs::from_iter(args.iter().map(|(k, v)| (*k, FluentValue::from(*v))))
        });

        let mut errors = vec![];
        bundle
            .format_pattern(pattern, fluent_args.as_ref(), &mut errors)
            .into_owned()
    }

    /// Get a localized message with simple string arguments
    pub fn get_message_with_args(
        &self,
        key: &str,
        args: &[(&str, &str)],
        language_code: Option<&str>,
    ) -> String {
        let args_map: HashMap<&str, &str> = args.iter().cloned().collect();
        self.get_message(key, language_code, Some(&args_map))
    }

    /// Whether `key` exists in every shipped language
    pub fn has_message(&self, key: &str) -> bool {
        self.bundles.values().all(|bundle| bundle.has_message(key))
    }
}
