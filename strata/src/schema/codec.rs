// src/schema/codec.rs
//
// Bidirectional column-name codec: template <-> field values.
//
// A codec enumerates its columns once, at construction, and builds the reverse
// index from that same enumeration. Encoding, decoding and `columns()` all read
// from one table, so generation and parsing cannot drift apart. Any two field
// tuples that render to the same string are rejected up front.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Ordered field -> value domain table.
pub type FieldDomains = IndexMap<String, Vec<String>>;

/// Field -> value mapping recovered from (or used to build) a column name,
/// in declared field order.
pub type FieldValues = IndexMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed `literal_{FIELD}_literal` column template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl ColumnTemplate {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = raw.chars();

        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for n in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        if n == '{' {
                            return Err(Error::config(format!(
                                "nested '{{' in column template '{raw}'"
                            )));
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(Error::config(format!(
                            "unterminated field in column template '{raw}'"
                        )));
                    }
                    if name.is_empty() {
                        return Err(Error::config(format!(
                            "empty field name in column template '{raw}'"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name));
                }
                '}' => {
                    return Err(Error::config(format!(
                        "unmatched '}}' in column template '{raw}'"
                    )));
                }
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True when the template references `{field}`.
    pub fn references(&self, field: &str) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Field(name) if name == field))
    }

    /// Referenced fields in order of first appearance.
    pub fn fields(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for s in &self.segments {
            if let Segment::Field(name) = s {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// The template with every `{field}` removed, together with the `_`
    /// joining it to the preceding (or, at the start, following) literal.
    pub fn without_field(&self, field: &str) -> Self {
        let mut segments: Vec<Segment> = Vec::with_capacity(self.segments.len());
        let mut strip_leading = false;
        for s in &self.segments {
            match s {
                Segment::Field(name) if name == field => {
                    let mut emptied = false;
                    match segments.last_mut() {
                        Some(Segment::Literal(text)) if text.ends_with('_') => {
                            text.pop();
                            emptied = text.is_empty();
                        }
                        Some(_) => {}
                        None => strip_leading = true,
                    }
                    if emptied {
                        segments.pop();
                    }
                }
                Segment::Literal(text) => {
                    let text = if std::mem::take(&mut strip_leading) {
                        text.strip_prefix('_').unwrap_or(text)
                    } else {
                        text.as_str()
                    };
                    if text.is_empty() {
                        continue;
                    }
                    match segments.last_mut() {
                        Some(Segment::Literal(prev)) => prev.push_str(text),
                        _ => segments.push(Segment::Literal(text.to_string())),
                    }
                }
                other => segments.push(other.clone()),
            }
        }

        let raw: String = segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.clone(),
                Segment::Field(name) => format!("{{{name}}}"),
            })
            .collect();
        Self { raw, segments }
    }

    /// Render with every referenced field resolved through `lookup`.
    fn render<'a>(&self, lookup: impl Fn(&str) -> Option<&'a str>) -> Option<String> {
        let mut out = String::with_capacity(self.raw.len() + 16);
        for s in &self.segments {
            match s {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(lookup(name)?),
            }
        }
        Some(out)
    }
}

/// Codec for one measure's columns.
#[derive(Debug, Clone)]
pub struct ColumnCodec {
    template: ColumnTemplate,
    /// Referenced fields, in domain declaration order.
    fields: Vec<String>,
    domains: Vec<Vec<String>>,
    columns: Vec<String>,
    index: HashMap<String, usize>,
}

impl ColumnCodec {
    /// Build a codec from a template string and the shared domain table.
    ///
    /// Columns are the cartesian product of the referenced fields' domains, in
    /// the order those fields are declared in `domains` (last field varies
    /// fastest).
    pub fn new(template: &str, domains: &FieldDomains) -> Result<Self> {
        let template = ColumnTemplate::parse(template)?;

        for name in template.fields() {
            if !domains.contains_key(name) {
                return Err(Error::config(format!(
                    "column template '{}' references undeclared field '{name}'",
                    template.as_str()
                )));
            }
        }

        let mut fields = Vec::new();
        let mut field_domains = Vec::new();
        for (name, values) in domains {
            if !template.references(name) {
                continue;
            }
            if values.is_empty() {
                return Err(Error::config(format!(
                    "field '{name}' used by '{}' has an empty value domain",
                    template.as_str()
                )));
            }
            fields.push(name.clone());
            field_domains.push(values.clone());
        }

        let total: usize = field_domains.iter().map(Vec::len).product();
        let mut columns = Vec::with_capacity(total);
        let mut index = HashMap::with_capacity(total);
        let mut odometer = vec![0usize; fields.len()];

        for i in 0..total {
            let column = template
                .render(|name| {
                    let pos = fields.iter().position(|f| f == name)?;
                    Some(field_domains[pos][odometer[pos]].as_str())
                })
                .ok_or_else(|| {
                    Error::config(format!("failed to render '{}'", template.as_str()))
                })?;

            if let Some(&previous) = index.get(&column) {
                return Err(Error::config(format!(
                    "column template '{}' is not injective: tuples #{previous} and #{i} both render '{column}'",
                    template.as_str()
                )));
            }
            index.insert(column.clone(), i);
            columns.push(column);

            // Advance the mixed-radix counter, last field fastest.
            for pos in (0..odometer.len()).rev() {
                odometer[pos] += 1;
                if odometer[pos] < field_domains[pos].len() {
                    break;
                }
                odometer[pos] = 0;
            }
        }

        Ok(Self {
            template,
            fields,
            domains: field_domains,
            columns,
            index,
        })
    }

    pub fn template(&self) -> &str {
        self.template.as_str()
    }

    /// Referenced fields in domain declaration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Field values that generated column `i`.
    pub fn values_at(&self, i: usize) -> Option<FieldValues> {
        if i >= self.columns.len() {
            return None;
        }
        let mut rem = i;
        let mut picks = vec![0usize; self.fields.len()];
        for pos in (0..self.fields.len()).rev() {
            let radix = self.domains[pos].len();
            picks[pos] = rem % radix;
            rem /= radix;
        }
        Some(
            self.fields
                .iter()
                .zip(picks)
                .enumerate()
                .map(|(pos, (name, pick))| (name.clone(), self.domains[pos][pick].clone()))
                .collect(),
        )
    }

    /// Exact inverse of column generation.
    pub fn decode(&self, column: &str) -> Option<FieldValues> {
        self.index.get(column).and_then(|&i| self.values_at(i))
    }

    /// Render a column from field values. Every referenced field must be given
    /// and must lie in its domain; extra fields are ignored.
    pub fn encode<K, V>(&self, values: &[(K, V)]) -> Option<String>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let column = self.template.render(|name| {
            values
                .iter()
                .find(|(k, _)| k.as_ref() == name)
                .map(|(_, v)| v.as_ref())
        })?;
        self.index.contains_key(&column).then_some(column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domains(entries: &[(&str, &[&str])]) -> FieldDomains {
        entries
            .iter()
            .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
            .collect()
    }

    #[test]
    fn removing_a_field_takes_its_separator_along() {
        let t = ColumnTemplate::parse("deaths_{CAUSE}_age_{AGE}_{STRATUM}").unwrap();
        assert_eq!(t.without_field("STRATUM").as_str(), "deaths_{CAUSE}_age_{AGE}");

        let t = ColumnTemplate::parse("{STRATUM}_deaths_{CAUSE}").unwrap();
        assert_eq!(t.without_field("STRATUM").as_str(), "deaths_{CAUSE}");

        let t = ColumnTemplate::parse("total_{POP}").unwrap();
        assert_eq!(t.without_field("STRATUM"), t);
    }

    #[test]
    fn cartesian_order_follows_declared_fields() {
        let d = domains(&[("CAUSE", &["a", "b"]), ("YEAR", &["2020", "2021"])]);
        let codec = ColumnCodec::new("deaths_{CAUSE}_{YEAR}", &d).unwrap();
        assert_eq!(
            codec.columns(),
            &[
                "deaths_a_2020",
                "deaths_a_2021",
                "deaths_b_2020",
                "deaths_b_2021"
            ]
        );
    }

    #[test]
    fn declared_order_wins_over_template_order() {
        let d = domains(&[("YEAR", &["2020", "2021"]), ("CAUSE", &["a", "b"])]);
        let codec = ColumnCodec::new("deaths_{CAUSE}_{YEAR}", &d).unwrap();
        assert_eq!(codec.fields(), &["YEAR", "CAUSE"]);
        assert_eq!(codec.columns()[1], "deaths_b_2020");
    }

    #[test]
    fn decode_inverts_every_column() {
        let d = domains(&[
            ("CAUSE", &["other_causes", "measles"]),
            ("SEX", &["male", "female"]),
            ("UNUSED", &["x"]),
        ]);
        let codec = ColumnCodec::new("death_due_to_{CAUSE}_sex_{SEX}", &d).unwrap();
        for (i, col) in codec.columns().iter().enumerate() {
            assert_eq!(codec.decode(col), codec.values_at(i));
        }
        let v = codec.decode("death_due_to_measles_sex_female").unwrap();
        assert_eq!(v["CAUSE"], "measles");
        assert_eq!(v["SEX"], "female");
        assert!(!v.contains_key("UNUSED"));
    }

    #[test]
    fn collision_is_rejected() {
        let d = domains(&[("X", &["b", "b_c"]), ("Y", &["c_d", "d"])]);
        let err = ColumnCodec::new("a_{X}_{Y}", &d).unwrap_err();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("not injective")));
    }

    #[test]
    fn undeclared_field_is_rejected() {
        let d = domains(&[("X", &["1"])]);
        assert!(ColumnCodec::new("a_{X}_{Z}", &d).is_err());
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert!(ColumnTemplate::parse("a_{X").is_err());
        assert!(ColumnTemplate::parse("a_X}").is_err());
        assert!(ColumnTemplate::parse("a_{}").is_err());
        assert!(ColumnTemplate::parse("a_{{X}}").is_err());
    }

    #[test]
    fn template_without_fields_has_one_column() {
        let codec = ColumnCodec::new("total_population", &FieldDomains::new()).unwrap();
        assert_eq!(codec.columns(), &["total_population"]);
        assert!(codec.decode("total_population").unwrap().is_empty());
    }

    #[test]
    fn encode_rejects_out_of_domain_values() {
        let d = domains(&[("SEX", &["male", "female"])]);
        let codec = ColumnCodec::new("births_{SEX}", &d).unwrap();
        assert_eq!(
            codec.encode(&[("SEX", "female")]).as_deref(),
            Some("births_female")
        );
        assert!(codec.encode(&[("SEX", "other")]).is_none());
        assert!(codec.encode::<&str, &str>(&[]).is_none());
    }
}
