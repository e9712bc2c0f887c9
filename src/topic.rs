//! Топики и фильтры подписки.
//!
//! Топик: иерархическая строка с уровнями через `/`
//! (`B/D/shopit/product-catalog/response`). Фильтр подписки дополнительно
//! допускает MQTT-шаблоны: `+` (ровно один уровень) и `#` (хвост, только
//! последним уровнем).

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use topicwire_error::{GenericError, StackError, StatusCode, SubscribeError, WireResult};

/// Разделитель уровней топика.
pub const LEVEL_SEPARATOR: char = '/';

/// Скомпилированный фильтр топиков с поддержкой `+` и `#`.
#[derive(Debug, Clone)]
pub struct TopicFilter {
    filter: String,
    matcher: GlobSet,
}

////////////////////////////////////////////////////////////////////////////////
// Проверки топиков
////////////////////////////////////////////////////////////////////////////////

/// Проверяет топик, в который публикуется сообщение.
///
/// Топик не должен быть пустым, содержать NUL или символы шаблонов.
pub fn validate_topic(topic: &str) -> WireResult<()> {
    if topic.is_empty() {
        return Err(invalid_topic(topic, "topic is empty"));
    }
    if topic.contains('\0') {
        return Err(invalid_topic(topic, "topic contains NUL"));
    }
    if topic.contains(['+', '#']) {
        return Err(invalid_topic(topic, "wildcards are not allowed in publish topics"));
    }
    Ok(())
}

/// Проверяет фильтр подписки по правилам MQTT.
pub fn validate_filter(filter: &str) -> Result<(), SubscribeError> {
    let reject = |reason: &str| SubscribeError::InvalidTopic {
        topic: filter.to_string(),
        reason: reason.to_string(),
    };

    if filter.is_empty() {
        return Err(reject("filter is empty"));
    }
    if filter.contains('\0') {
        return Err(reject("filter contains NUL"));
    }

    let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
    for (idx, level) in levels.iter().enumerate() {
        match *level {
            "#" if idx + 1 != levels.len() => {
                return Err(reject("'#' must be the last level"));
            }
            "#" | "+" => {}
            other if other.contains(['+', '#']) => {
                return Err(reject("wildcards must occupy a whole level"));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Возвращает `true`, если фильтр содержит шаблоны.
pub fn is_wildcard(filter: &str) -> bool {
    filter.contains(['+', '#'])
}

fn invalid_topic(
    topic: &str,
    reason: &str,
) -> StackError {
    StackError::new(GenericError::new(
        StatusCode::InvalidTopic,
        format!("Invalid topic '{topic}': {reason}"),
    ))
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl TopicFilter {
    /// Компилирует MQTT-фильтр в glob-сопоставитель.
    ///
    /// `+` превращается в `*` (без пересечения `/`), `#` в `**`. Фильтр
    /// `a/#` также совпадает с самим `a`, как того требует MQTT.
    pub fn new(filter: &str) -> Result<Self, SubscribeError> {
        validate_filter(filter)?;

        let mut builder = GlobSetBuilder::new();
        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();

        if levels.last() == Some(&"#") && levels.len() > 1 {
            let parent = levels[..levels.len() - 1].join("/");
            builder.add(compile(&to_glob(&parent), filter)?);
        }
        builder.add(compile(&to_glob(filter), filter)?);

        let matcher = builder.build().map_err(|e| SubscribeError::InvalidTopic {
            topic: filter.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            filter: filter.to_string(),
            matcher,
        })
    }

    /// Проверяет, подходит ли топик под фильтр.
    pub fn matches(
        &self,
        topic: &str,
    ) -> bool {
        self.matcher.is_match(topic)
    }

    /// Исходная строка фильтра.
    pub fn as_str(&self) -> &str {
        &self.filter
    }
}

fn to_glob(filter: &str) -> String {
    filter
        .split(LEVEL_SEPARATOR)
        .map(|level| match level {
            "+" => "*".to_string(),
            "#" => "**".to_string(),
            literal => escape_level(literal),
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn escape_level(level: &str) -> String {
    let mut out = String::with_capacity(level.len());
    for ch in level.chars() {
        match ch {
            '*' | '?' | '[' | ']' | '{' | '}' => {
                out.push('[');
                out.push(ch);
                out.push(']');
            }
            _ => out.push(ch),
        }
    }
    out
}

fn compile(
    glob: &str,
    filter: &str,
) -> Result<globset::Glob, SubscribeError> {
    GlobBuilder::new(glob)
        .literal_separator(true)
        .backslash_escape(false)
        .build()
        .map_err(|e| SubscribeError::InvalidTopic {
            topic: filter.to_string(),
            reason: e.to_string(),
        })
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для TopicFilter
////////////////////////////////////////////////////////////////////////////////

impl std::fmt::Display for TopicFilter {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(&self.filter)
    }
}

impl PartialEq for TopicFilter {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.filter == other.filter
    }
}

impl Eq for TopicFilter {}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    /// Тест проверяет, что корректные топики публикации проходят проверку.
    #[test]
    fn test_validate_topic_ok() {
        assert!(validate_topic("B/D/shopit/product-catalog/request").is_ok());
        assert!(validate_topic("a").is_ok());
    }

    /// Тест проверяет отклонение пустых топиков и топиков с шаблонами.
    #[rstest]
    #[case("")]
    #[case("a/+/b")]
    #[case("a/#")]
    #[case("a\0b")]
    fn test_validate_topic_rejects(#[case] topic: &str) {
        let err = validate_topic(topic).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::InvalidTopic);
    }

    /// Тест проверяет правила размещения шаблонов в фильтре.
    #[rstest]
    #[case("a/+/c", true)]
    #[case("a/#", true)]
    #[case("#", true)]
    #[case("a/#/c", false)]
    #[case("a/b+/c", false)]
    #[case("", false)]
    fn test_validate_filter(
        #[case] filter: &str,
        #[case] ok: bool,
    ) {
        assert_eq!(validate_filter(filter).is_ok(), ok, "filter={filter}");
    }

    /// Тест проверяет, что `+` совпадает ровно с одним уровнем.
    #[test]
    fn test_single_level_wildcard() {
        let f = TopicFilter::new("B/D/bankit/+/live-history").unwrap();
        assert!(f.matches("B/D/bankit/gopay/live-history"));
        assert!(!f.matches("B/D/bankit/gopay/extra/live-history"));
        assert!(!f.matches("B/D/bankit/live-history"));
    }

    /// Тест проверяет, что `#` совпадает с хвостом и с родительским уровнем.
    #[test]
    fn test_multi_level_wildcard() {
        let f = TopicFilter::new("B/D/bankit/#").unwrap();
        assert!(f.matches("B/D/bankit"));
        assert!(f.matches("B/D/bankit/gopay/transfer/receive"));
        assert!(!f.matches("B/D/shopit/buy/response"));
    }

    /// Тест проверяет, что фильтр без шаблонов совпадает только с собой,
    /// а glob-символы в уровнях трактуются буквально.
    #[test]
    fn test_literal_filter() {
        let f = TopicFilter::new("a/b*/c").unwrap();
        assert!(f.matches("a/b*/c"));
        assert!(!f.matches("a/bxx/c"));
        assert!(!is_wildcard("a/b*/c"));
        assert!(is_wildcard("a/+/c"));
    }
}
