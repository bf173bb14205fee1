use crate::dataset::EntityFilter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Every chart the renderer knows how to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChartKind {
    Bar,
    Line,
    Scatter,
    Pie,
    Box,
    Histogram,
    Bubble,
    Candlestick,
    Heatmap,
}

impl ChartKind {
    /// Kinds offered in the chart picker, in display order
    pub const SELECTABLE: [ChartKind; 8] = [
        ChartKind::Bar,
        ChartKind::Line,
        ChartKind::Scatter,
        ChartKind::Pie,
        ChartKind::Box,
        ChartKind::Histogram,
        ChartKind::Bubble,
        ChartKind::Candlestick,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ChartKind::Bar => "Bar Chart",
            ChartKind::Line => "Line Chart",
            ChartKind::Scatter => "Scatter Plot",
            ChartKind::Pie => "Pie Chart",
            ChartKind::Box => "Box Plot",
            ChartKind::Histogram => "Histogram",
            ChartKind::Bubble => "Bubble Chart",
            ChartKind::Candlestick => "Candlestick Chart",
            ChartKind::Heatmap => "Heatmap",
        }
    }

    /// Accepts the picker names ("Bar", "Scatter", ...) and the full labels
    pub fn from_name(name: &str) -> Option<ChartKind> {
        let name = name.trim();
        [
            ChartKind::Bar,
            ChartKind::Line,
            ChartKind::Scatter,
            ChartKind::Pie,
            ChartKind::Box,
            ChartKind::Histogram,
            ChartKind::Bubble,
            ChartKind::Candlestick,
            ChartKind::Heatmap,
        ]
        .into_iter()
        .find(|kind| {
            name.eq_ignore_ascii_case(kind.label()) || name.eq_ignore_ascii_case(&format!("{:?}", kind))
        })
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The chart picked by the user
///
/// Names that match no [`ChartKind`] are kept as `Unrecognized` so the
/// resolver can apply its documented histogram fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChartChoice {
    Kind(ChartKind),
    Unrecognized(String),
}

impl ChartChoice {
    pub fn parse(name: &str) -> Self {
        match ChartKind::from_name(name) {
            Some(kind) => ChartChoice::Kind(kind),
            None => ChartChoice::Unrecognized(name.to_string()),
        }
    }
}

impl From<String> for ChartChoice {
    fn from(name: String) -> Self {
        ChartChoice::parse(&name)
    }
}

impl From<ChartChoice> for String {
    fn from(choice: ChartChoice) -> Self {
        match choice {
            ChartChoice::Kind(kind) => format!("{:?}", kind),
            ChartChoice::Unrecognized(name) => name,
        }
    }
}

impl From<ChartKind> for ChartChoice {
    fn from(kind: ChartKind) -> Self {
        ChartChoice::Kind(kind)
    }
}

impl Default for ChartChoice {
    fn default() -> Self {
        ChartChoice::Kind(ChartKind::Bar)
    }
}

/// Sort direction of a ranking question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// How grouped rows are collapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Mean,
    Sum,
}

/// The derivation a question performs before charting
#[derive(Debug, Clone, PartialEq)]
pub enum Transform<'a> {
    /// Rows pass through unchanged
    Passthrough,
    /// Stable sort by `column`, keep the first `limit` rows
    TopN {
        column: &'a str,
        order: SortOrder,
        limit: usize,
    },
    /// One row per distinct `key`, `value` collapsed with `reducer`
    Grouped {
        key: &'a str,
        value: &'a str,
        reducer: Reducer,
    },
    /// `output = numerator / denominator`, then ranked by `output`
    RatioTopN {
        numerator: &'a str,
        denominator: &'a str,
        output: &'a str,
        order: SortOrder,
        limit: usize,
    },
    /// Pairwise Pearson correlation of every numeric column
    Correlation,
    /// A single numeric column, binned later by the renderer
    Distribution { column: &'a str },
}

/// Column bindings a question hands to the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bindings<'a> {
    pub x: Option<&'a str>,
    pub y: Option<&'a str>,
    pub color: Option<&'a str>,
    pub size: Option<&'a str>,
}

/// Everything a question bundles: how to transform, what to draw, with which fields
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionPlan<'a> {
    pub transform: Transform<'a>,
    pub chart: ChartKind,
    pub bindings: Bindings<'a>,
}

const TOP: usize = 10;

/// Pre-built analyses over the bundled market dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisQuestion {
    TopByMarketCap,
    TopByVolume24h,
    LargestTotalSupply,
    LargestMaxSupply,
    SmallestCirculatingSupply,
    HighestChange1h,
    HighestChange24h,
    HighestChange7d,
    BiggestLosers24h,
    HighestVolumeToMarketCap,
    TopPriceInBtc,
    AveragePriceBySymbol,
    TotalMarketCapBySymbol,
    AverageChange7dBySymbol,
    CorrelationMatrix,
    PriceVsMarketCap,
    MarketCapVsVolume,
    PriceTrend,
    Change24hSpread,
    PriceDistribution,
    Change24hDistribution,
}

impl AnalysisQuestion {
    pub const ALL: [AnalysisQuestion; 21] = [
        AnalysisQuestion::TopByMarketCap,
        AnalysisQuestion::TopByVolume24h,
        AnalysisQuestion::LargestTotalSupply,
        AnalysisQuestion::LargestMaxSupply,
        AnalysisQuestion::SmallestCirculatingSupply,
        AnalysisQuestion::HighestChange1h,
        AnalysisQuestion::HighestChange24h,
        AnalysisQuestion::HighestChange7d,
        AnalysisQuestion::BiggestLosers24h,
        AnalysisQuestion::HighestVolumeToMarketCap,
        AnalysisQuestion::TopPriceInBtc,
        AnalysisQuestion::AveragePriceBySymbol,
        AnalysisQuestion::TotalMarketCapBySymbol,
        AnalysisQuestion::AverageChange7dBySymbol,
        AnalysisQuestion::CorrelationMatrix,
        AnalysisQuestion::PriceVsMarketCap,
        AnalysisQuestion::MarketCapVsVolume,
        AnalysisQuestion::PriceTrend,
        AnalysisQuestion::Change24hSpread,
        AnalysisQuestion::PriceDistribution,
        AnalysisQuestion::Change24hDistribution,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisQuestion::TopByMarketCap => "Top cryptocurrencies by market capitalization",
            AnalysisQuestion::TopByVolume24h => "Top cryptocurrencies by 24h trading volume",
            AnalysisQuestion::LargestTotalSupply => "Cryptocurrencies with the largest total supply",
            AnalysisQuestion::LargestMaxSupply => "Cryptocurrencies with the largest maximum supply",
            AnalysisQuestion::SmallestCirculatingSupply => "Cryptocurrencies with the smallest circulating supply",
            AnalysisQuestion::HighestChange1h => "Highest percentage change in the last hour",
            AnalysisQuestion::HighestChange24h => "Highest percentage change in the last 24 hours",
            AnalysisQuestion::HighestChange7d => "Highest percentage change in the last 7 days",
            AnalysisQuestion::BiggestLosers24h => "Biggest losers in the last 24 hours",
            AnalysisQuestion::HighestVolumeToMarketCap => "Highest 24h volume to market cap ratio",
            AnalysisQuestion::TopPriceInBtc => "Top cryptocurrencies by price in BTC",
            AnalysisQuestion::AveragePriceBySymbol => "Average price by cryptocurrency",
            AnalysisQuestion::TotalMarketCapBySymbol => "Total market capitalization per cryptocurrency",
            AnalysisQuestion::AverageChange7dBySymbol => "Average 7 day percentage change by cryptocurrency",
            AnalysisQuestion::CorrelationMatrix => "Correlation between numeric metrics",
            AnalysisQuestion::PriceVsMarketCap => "Price versus market capitalization",
            AnalysisQuestion::MarketCapVsVolume => "Market capitalization versus 24h volume",
            AnalysisQuestion::PriceTrend => "Price trend over time",
            AnalysisQuestion::Change24hSpread => "Spread of 24h percentage change",
            AnalysisQuestion::PriceDistribution => "Price distribution",
            AnalysisQuestion::Change24hDistribution => "24h percentage change distribution",
        }
    }

    pub fn from_label(label: &str) -> Option<AnalysisQuestion> {
        let label = label.trim();
        AnalysisQuestion::ALL
            .into_iter()
            .find(|q| q.label().eq_ignore_ascii_case(label))
    }

    /// The transform, chart kind and columns this question stands for
    ///
    /// # Arguments
    /// * `entity` - Column naming each asset; rankings label their bars with it
    ///   and per-asset questions group by it
    pub fn plan<'a>(&self, entity: &'a str) -> QuestionPlan<'a> {
        use AnalysisQuestion::*;

        let ranked = |column: &'a str, order: SortOrder| QuestionPlan {
            transform: Transform::TopN {
                column,
                order,
                limit: TOP,
            },
            chart: ChartKind::Bar,
            bindings: Bindings {
                x: Some(entity),
                y: Some(column),
                ..Bindings::default()
            },
        };
        let grouped = |value: &'a str, reducer: Reducer, chart: ChartKind| QuestionPlan {
            transform: Transform::Grouped {
                key: entity,
                value,
                reducer,
            },
            chart,
            bindings: Bindings {
                x: Some(entity),
                y: Some(value),
                ..Bindings::default()
            },
        };
        let direct = |chart: ChartKind, bindings: Bindings<'a>| QuestionPlan {
            transform: Transform::Passthrough,
            chart,
            bindings,
        };
        let distribution = |column: &'a str| QuestionPlan {
            transform: Transform::Distribution { column },
            chart: ChartKind::Histogram,
            bindings: Bindings {
                y: Some(column),
                ..Bindings::default()
            },
        };

        match self {
            TopByMarketCap => ranked("market_cap_usd", SortOrder::Descending),
            TopByVolume24h => ranked("24h_volume_usd", SortOrder::Descending),
            LargestTotalSupply => ranked("total_supply", SortOrder::Descending),
            LargestMaxSupply => ranked("max_supply", SortOrder::Descending),
            SmallestCirculatingSupply => ranked("circulating_supply", SortOrder::Ascending),
            HighestChange1h => ranked("percent_change_1h", SortOrder::Descending),
            HighestChange24h => ranked("percent_change_24h", SortOrder::Descending),
            HighestChange7d => ranked("percent_change_7d", SortOrder::Descending),
            BiggestLosers24h => ranked("percent_change_24h", SortOrder::Ascending),
            TopPriceInBtc => ranked("price_btc", SortOrder::Descending),
            HighestVolumeToMarketCap => QuestionPlan {
                transform: Transform::RatioTopN {
                    numerator: "24h_volume_usd",
                    denominator: "market_cap_usd",
                    output: "volume_to_market_cap",
                    order: SortOrder::Descending,
                    limit: TOP,
                },
                chart: ChartKind::Bar,
                bindings: Bindings {
                    x: Some(entity),
                    y: Some("volume_to_market_cap"),
                    ..Bindings::default()
                },
            },
            AveragePriceBySymbol => grouped("price_usd", Reducer::Mean, ChartKind::Bar),
            TotalMarketCapBySymbol => grouped("market_cap_usd", Reducer::Sum, ChartKind::Pie),
            AverageChange7dBySymbol => grouped("percent_change_7d", Reducer::Mean, ChartKind::Bar),
            CorrelationMatrix => QuestionPlan {
                transform: Transform::Correlation,
                chart: ChartKind::Heatmap,
                bindings: Bindings::default(),
            },
            PriceVsMarketCap => direct(
                ChartKind::Scatter,
                Bindings {
                    x: Some("market_cap_usd"),
                    y: Some("price_usd"),
                    color: Some(entity),
                    size: None,
                },
            ),
            MarketCapVsVolume => direct(
                ChartKind::Bubble,
                Bindings {
                    x: Some("market_cap_usd"),
                    y: Some("24h_volume_usd"),
                    color: Some(entity),
                    size: Some("circulating_supply"),
                },
            ),
            PriceTrend => direct(
                ChartKind::Line,
                Bindings {
                    x: Some("last_updated"),
                    y: Some("price_usd"),
                    color: Some(entity),
                    size: None,
                },
            ),
            Change24hSpread => direct(
                ChartKind::Box,
                Bindings {
                    x: Some(entity),
                    y: Some("percent_change_24h"),
                    ..Bindings::default()
                },
            ),
            PriceDistribution => distribution("price_usd"),
            Change24hDistribution => distribution("percent_change_24h"),
        }
    }
}

impl fmt::Display for AnalysisQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which dataset the selection points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DatasetChoice {
    /// The cached dataset supplied by the loader
    #[default]
    Bundled,
    /// A CSV the user uploaded during this session
    Uploaded { name: String },
}

/// An additional x/y pair drawn as its own chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisPair {
    pub x: String,
    pub y: String,
}

/// The user's current choices
///
/// Only the user edits this. The resolution pipeline reads it and never
/// writes back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SelectionContext {
    pub dataset: DatasetChoice,
    pub entity_filter: Option<EntityFilter>,

    /// When set, the question's own chart kind and columns win over the fields below
    pub question: Option<AnalysisQuestion>,

    pub chart: ChartChoice,
    pub x_column: Option<String>,

    /// First entry is the y axis; candlesticks read open, high, low, close in order
    pub y_columns: Vec<String>,

    pub color_column: Option<String>,
    pub size_column: Option<String>,

    /// Further pairs charted with the same kind; ignored while a question is set
    pub extra_pairs: Vec<AxisPair>,
}

impl SelectionContext {
    /// A direct plot of `y` against `x`
    pub fn plot(chart: impl Into<ChartChoice>, x: &str, y: &str) -> Self {
        Self {
            chart: chart.into(),
            x_column: Some(x.to_string()),
            y_columns: vec![y.to_string()],
            ..Self::default()
        }
    }

    pub fn ask(question: AnalysisQuestion) -> Self {
        Self {
            question: Some(question),
            ..Self::default()
        }
    }

    pub fn y_column(&self) -> Option<&str> {
        self.y_columns.first().map(String::as_str)
    }

    /// One selection per chart to draw, this one first
    ///
    /// Every extra pair becomes a direct plot of its own, sharing the chart
    /// kind and color/size columns.
    pub fn charted(&self) -> Vec<SelectionContext> {
        let mut charts = vec![SelectionContext {
            extra_pairs: Vec::new(),
            ..self.clone()
        }];
        if self.question.is_some() {
            return charts;
        }
        charts.extend(self.extra_pairs.iter().map(|pair| SelectionContext {
            x_column: Some(pair.x.clone()),
            y_columns: vec![pair.y.clone()],
            extra_pairs: Vec::new(),
            ..self.clone()
        }));
        charts
    }

    /// Selected measures: the y columns, then the extra pairs' y columns, each once
    pub fn measures(&self) -> Vec<&str> {
        let mut measures: Vec<&str> = Vec::new();
        let pairs = self.extra_pairs.iter().map(|pair| pair.y.as_str());
        for column in self.y_columns.iter().map(String::as_str).chain(pairs) {
            if !measures.contains(&column) {
                measures.push(column);
            }
        }
        measures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_names_parse_case_insensitively() {
        assert_eq!(ChartKind::from_name("bar"), Some(ChartKind::Bar));
        assert_eq!(ChartKind::from_name("Scatter Plot"), Some(ChartKind::Scatter));
        assert_eq!(ChartKind::from_name("Histogram"), Some(ChartKind::Histogram));
        assert_eq!(ChartKind::from_name("Violin"), None);
        assert_eq!(ChartChoice::parse("Violin"), ChartChoice::Unrecognized("Violin".to_string()));
    }

    #[test]
    fn every_question_has_a_unique_label() {
        for question in AnalysisQuestion::ALL {
            assert_eq!(AnalysisQuestion::from_label(question.label()), Some(question));
        }
    }

    #[test]
    fn ranking_questions_chart_symbol_against_their_column() {
        let plan = AnalysisQuestion::TopByMarketCap.plan("symbol");
        assert_eq!(plan.chart, ChartKind::Bar);
        assert_eq!(plan.bindings.x, Some("symbol"));
        assert_eq!(plan.bindings.y, Some("market_cap_usd"));
        assert_eq!(
            plan.transform,
            Transform::TopN {
                column: "market_cap_usd",
                order: SortOrder::Descending,
                limit: 10
            }
        );
    }

    #[test]
    fn per_asset_questions_use_the_given_entity_column() {
        let plan = AnalysisQuestion::AveragePriceBySymbol.plan("ticker");
        assert_eq!(
            plan.transform,
            Transform::Grouped {
                key: "ticker",
                value: "price_usd",
                reducer: Reducer::Mean
            }
        );
        assert_eq!(plan.bindings.x, Some("ticker"));
        assert_eq!(AnalysisQuestion::PriceTrend.plan("ticker").bindings.color, Some("ticker"));
        assert_eq!(AnalysisQuestion::TopByVolume24h.plan("ticker").bindings.x, Some("ticker"));
    }

    #[test]
    fn extra_pairs_become_their_own_plots() {
        let mut selection = SelectionContext::plot(ChartKind::Scatter, "market_cap_usd", "price_usd");
        selection.color_column = Some("symbol".to_string());
        selection.extra_pairs = vec![
            AxisPair {
                x: "rank".to_string(),
                y: "price_usd".to_string(),
            },
            AxisPair {
                x: "rank".to_string(),
                y: "24h_volume_usd".to_string(),
            },
        ];

        let charted = selection.charted();
        assert_eq!(charted.len(), 3);
        assert!(charted.iter().all(|s| s.extra_pairs.is_empty()));
        assert_eq!(charted[0].x_column.as_deref(), Some("market_cap_usd"));
        assert_eq!(charted[2].x_column.as_deref(), Some("rank"));
        assert_eq!(charted[2].y_columns, ["24h_volume_usd"]);
        assert_eq!(charted[2].color_column.as_deref(), Some("symbol"));
        assert_eq!(selection.measures(), ["price_usd", "24h_volume_usd"]);

        selection.question = Some(AnalysisQuestion::PriceTrend);
        assert_eq!(selection.charted().len(), 1);
    }

    #[test]
    fn selection_round_trips_through_json() {
        let json = r#"{
            "dataset": {"source": "uploaded", "name": "mine.csv"},
            "entity_filter": {"column": "symbol", "value": "BTC"},
            "chart": "Violin",
            "x_column": "a",
            "y_columns": ["b"],
            "extra_pairs": [{"x": "a", "y": "c"}]
        }"#;
        let selection: SelectionContext = serde_json::from_str(json).unwrap();
        assert_eq!(selection.dataset, DatasetChoice::Uploaded { name: "mine.csv".to_string() });
        assert_eq!(selection.chart, ChartChoice::Unrecognized("Violin".to_string()));
        assert_eq!(selection.y_column(), Some("b"));
        assert_eq!(selection.measures(), ["b", "c"]);
        assert_eq!(selection.question, None);

        let asked: SelectionContext = serde_json::from_str(r#"{"question": "top_by_market_cap"}"#).unwrap();
        assert_eq!(asked, SelectionContext::ask(AnalysisQuestion::TopByMarketCap));
    }
}
