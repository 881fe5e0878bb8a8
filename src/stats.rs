//! Price extraction, distribution summaries and title popularity over stored records.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::StoreResult;
use crate::record::Record;
use crate::store::write_atomic;

fn price_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d[\d,\s]*(?:\.\d+)?").expect("price pattern is valid"))
}

/// Extract a numeric price from scraped text such as `ETB 1,200.50` or `Br 3 500`.
/// Placeholders like `No price found` give `None`. Ranges keep their first number.
pub fn parse_price(text: &str) -> Option<f64> {
    let found = price_pattern().find(text)?;
    let digits: String = found.as_str().chars().filter(|c| !c.is_whitespace() && *c != ',').collect();
    digits.parse().ok()
}

/// Price band counts: quartile edges over `[min, max]`, as Low / Mid / High
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBands {
    pub edges: [f64; 5],
    pub low: usize,
    pub mid: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Parsed prices of a record set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceSummary {
    prices: Vec<f64>,
    pub unparsed: usize,
}

impl PriceSummary {
    pub fn from_records<'a, I>(records: I, field: &str) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut summary = PriceSummary::default();
        for record in records {
            match parse_price(&record.persisted(field)) {
                Some(price) => summary.prices.push(price),
                None => summary.unparsed += 1,
            }
        }
        summary.prices.sort_by(f64::total_cmp);
        summary
    }

    pub fn count(&self) -> usize {
        self.prices.len()
    }

    pub fn min(&self) -> Option<f64> {
        self.prices.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.prices.last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.prices.is_empty() {
            return None;
        }
        Some(self.prices.iter().sum::<f64>() / self.prices.len() as f64)
    }

    pub fn median(&self) -> Option<f64> {
        let n = self.prices.len();
        match n {
            0 => None,
            _ if n % 2 == 1 => Some(self.prices[n / 2]),
            _ => Some((self.prices[n / 2 - 1] + self.prices[n / 2]) / 2.0),
        }
    }

    pub fn bands(&self) -> Option<PriceBands> {
        let (min, max) = (self.min()?, self.max()?);
        let step = (max - min) / 4.0;
        let edges = [min, min + step, min + 2.0 * step, min + 3.0 * step, max];

        let mut bands = PriceBands { edges, low: 0, mid: 0, high: 0 };
        for &price in &self.prices {
            if price <= edges[1] {
                bands.low += 1;
            } else if price <= edges[2] {
                bands.mid += 1;
            } else {
                bands.high += 1;
            }
        }
        Some(bands)
    }

    /// Equal-width bins over `[min, max]`; the last bin includes `max`
    pub fn histogram(&self, bins: usize) -> Vec<HistogramBin> {
        let (min, max) = match (self.min(), self.max()) {
            (Some(min), Some(max)) if bins > 0 => (min, max),
            _ => return Vec::new(),
        };

        if max == min {
            return vec![HistogramBin { lower: min, upper: max, count: self.prices.len() }];
        }

        let width = (max - min) / bins as f64;
        let mut histogram: Vec<HistogramBin> = (0..bins)
            .map(|i| HistogramBin {
                lower: min + width * i as f64,
                upper: if i + 1 == bins { max } else { min + width * (i + 1) as f64 },
                count: 0,
            })
            .collect();

        for &price in &self.prices {
            let idx = (((price - min) / width) as usize).min(bins - 1);
            histogram[idx].count += 1;
        }
        histogram
    }
}

/// How often one title occurs in a store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TitleCount {
    pub title: String,
    pub frequency: usize,
}

/// The `n` most frequent non-empty values of `field`, most frequent first.
/// Equal counts keep the order in which the titles were first seen.
pub fn popular_titles<'a, I>(records: I, field: &str, n: usize) -> Vec<TitleCount>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut counts: Vec<TitleCount> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for record in records {
        let title = record.persisted(field);
        if title.is_empty() {
            continue;
        }
        match seen.get(&*title) {
            Some(&i) => counts[i].frequency += 1,
            None => {
                seen.insert(title.to_string(), counts.len());
                counts.push(TitleCount { title: title.into_owned(), frequency: 1 });
            }
        }
    }

    counts.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    counts.truncate(n);
    counts
}

/// Write a `Title,Frequency` table, replacing `path` atomically
pub fn write_popular(path: &Path, popular: &[TitleCount]) -> StoreResult<()> {
    write_atomic(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["Title", "Frequency"])?;
        for entry in popular {
            writer.write_record([entry.title.as_str(), &entry.frequency.to_string()])?;
        }
        writer.flush()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn priced(prices: &[&str]) -> Vec<Record> {
        prices
            .iter()
            .enumerate()
            .map(|(i, p)| Record::new().with("link", format!("/p/{}", i)).with("price", *p))
            .collect()
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("ETB 1,200.50"), Some(1200.5));
        assert_eq!(parse_price("Br 3 500"), Some(3500.0));
        assert_eq!(parse_price("15000"), Some(15000.0));
        assert_eq!(parse_price("1,200 - 1,500 ETB"), Some(1200.0));
        assert_eq!(parse_price("No price found"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_summary() {
        let records = priced(&["ETB 100", "300", "No price", "ETB 200", ""]);
        let summary = PriceSummary::from_records(&records, "price");

        assert_eq!(summary.count(), 3);
        assert_eq!(summary.unparsed, 2);
        assert_eq!(summary.min(), Some(100.0));
        assert_eq!(summary.max(), Some(300.0));
        assert_eq!(summary.mean(), Some(200.0));
        assert_eq!(summary.median(), Some(200.0));
    }

    #[test]
    fn test_empty_summary() {
        let summary = PriceSummary::from_records(&priced(&["No price"]), "price");
        assert_eq!(summary.count(), 0);
        assert_eq!(summary.mean(), None);
        assert!(summary.bands().is_none());
        assert!(summary.histogram(10).is_empty());
    }

    #[test]
    fn test_bands() {
        let records = priced(&["0", "10", "25", "50", "60", "100"]);
        let bands = PriceSummary::from_records(&records, "price").bands().unwrap();

        assert_eq!(bands.edges, [0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!((bands.low, bands.mid, bands.high), (3, 1, 2));
    }

    #[test]
    fn test_histogram() {
        let records = priced(&["0", "5", "10", "95", "100"]);
        let histogram = PriceSummary::from_records(&records, "price").histogram(10);

        assert_eq!(histogram.len(), 10);
        assert_eq!(histogram[0].count, 2);
        assert_eq!(histogram[1].count, 1);
        assert_eq!(histogram[9].count, 2);
        assert_eq!(histogram[9].upper, 100.0);
        assert_eq!(histogram.iter().map(|b| b.count).sum::<usize>(), 5);

        let flat = PriceSummary::from_records(&priced(&["7", "7"]), "price").histogram(10);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].count, 2);
    }

    #[test]
    fn test_popular_titles() {
        let titles = ["Sofa", "Bed", "Sofa", "", "Chair", "Bed", "Sofa", "Desk"];
        let records: Vec<Record> = titles
            .iter()
            .enumerate()
            .map(|(i, t)| Record::new().with("link", format!("/p/{}", i)).with("title", *t))
            .collect();

        let top = popular_titles(&records, "title", 3);
        let ranked: Vec<(&str, usize)> = top.iter().map(|c| (c.title.as_str(), c.frequency)).collect();
        assert_eq!(ranked, vec![("Sofa", 3), ("Bed", 2), ("Chair", 1)]);

        assert_eq!(popular_titles(&records, "title", 10).len(), 4);
        assert!(popular_titles(&records, "brand", 10).is_empty());
    }

    #[test]
    fn test_write_popular() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("popular_products.csv");
        let popular = vec![
            TitleCount { title: "Sofa, 3 seat".to_string(), frequency: 3 },
            TitleCount { title: "Bed".to_string(), frequency: 1 },
        ];

        write_popular(&path, &popular).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Title,Frequency\n\"Sofa, 3 seat\",3\nBed,1\n");
    }
}
