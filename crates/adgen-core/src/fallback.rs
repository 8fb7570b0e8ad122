//! Placeholder artifacts for stages whose response could not be parsed.
//!
//! Every default has the same shape as genuine remote output, so later
//! stages consume it without special cases. The orchestrator records each
//! substitution in [`Session::degraded`](crate::Session::degraded).

use crate::config::FallbackConfig;
use crate::session::{
    AudienceInsights, Competitor, Demographics, MarketAnalysis, ProductMetadata, Script,
};

/// Supplies a complete default artifact per stage.
#[derive(Debug, Clone, Default)]
pub struct FallbackPolicy {
    videos: FallbackConfig,
}

impl FallbackPolicy {
    /// Create a policy using the configured placeholder videos.
    pub fn new(videos: FallbackConfig) -> Self {
        Self { videos }
    }

    /// Default product facts, tagged with the URL the user asked about.
    pub fn metadata(&self, product_url: &str) -> ProductMetadata {
        ProductMetadata {
            brand: "Optimum Nutrition".to_owned(),
            product_name: "Gold Standard 100% Whey Protein".to_owned(),
            product_category: "protein powder".to_owned(),
            description: "The world's best-selling whey protein powder with 24g of protein per \
                          serving to help build and maintain muscle."
                .to_owned(),
            key_features: [
                "24g protein per serving",
                "5.5g BCAAs",
                "4g glutamine",
                "instantized for easy mixing",
                "banned substance tested",
            ]
            .map(String::from)
            .to_vec(),
            price: Some("$59.99".to_owned()),
            image_url: Some("/placeholder.jpg".to_owned()),
            product_url: Some(product_url.to_owned()),
            extra: Default::default(),
        }
    }

    pub fn market_analysis(&self) -> MarketAnalysis {
        MarketAnalysis {
            market_size: "The global protein powder market is valued at $7.5 billion and \
                          growing at 8.1% annually"
                .to_owned(),
            market_trends: [
                "Increasing demand for plant-based and clean label protein supplements",
                "Growth in fitness and bodybuilding culture driving protein consumption",
                "Rising popularity of convenient ready-to-drink protein products",
            ]
            .map(String::from)
            .to_vec(),
            audience_insights: AudienceInsights {
                demographics: Demographics {
                    age: "22-50 years".to_owned(),
                    income: "$35,000-$100,000".to_owned(),
                    gender: "65% male, 35% female".to_owned(),
                    extra: Default::default(),
                },
                psychographics: "Health-conscious fitness enthusiasts who prioritize muscle \
                                 building, weight management, and active lifestyles."
                    .to_owned(),
                extra: Default::default(),
            },
            competitors: vec![
                Competitor {
                    name: "Dymatize ISO100".to_owned(),
                    brand: "Dymatize".to_owned(),
                    price: "$64.99".to_owned(),
                    features: "Hydrolyzed whey isolate, fast absorption, lactose-free".to_owned(),
                    description: "Premium whey protein isolate for serious athletes".to_owned(),
                    extra: Default::default(),
                },
                Competitor {
                    name: "Muscle Milk Pro Series".to_owned(),
                    brand: "Muscle Milk".to_owned(),
                    price: "$49.99".to_owned(),
                    features: "50g protein, slow and fast proteins, added creatine".to_owned(),
                    description: "High-protein formula designed for muscle building and recovery"
                        .to_owned(),
                    extra: Default::default(),
                },
            ],
            extra: Default::default(),
        }
    }

    pub fn script(&self) -> Script {
        Script {
            audio_script: "Just got my hands on this Optimum Nutrition Gold Standard Whey, and \
                           honestly? Game changer. 24 grams of protein per serving, mixes \
                           perfectly every time, and it actually tastes good. If you're serious \
                           about your gains, this is it."
                .to_owned(),
            video_script: "Close-up of protein powder container rotating slowly. Zoom in on \
                           '24g protein' label. Cut to powder being scooped and mixed in shaker \
                           bottle. Final shot: smooth, creamy protein shake being poured."
                .to_owned(),
        }
    }

    pub fn aroll_url(&self) -> String {
        self.videos.aroll_url.clone()
    }

    pub fn broll_url(&self) -> String {
        self.videos.broll_url.clone()
    }

    pub fn final_video_url(&self) -> String {
        self.videos.final_video_url.clone()
    }
}
