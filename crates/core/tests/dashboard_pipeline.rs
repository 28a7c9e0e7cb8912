use std::fs;
use std::path::{Path, PathBuf};

use pulseboard_core::config::SourcesConfig;
use pulseboard_core::{
    derive_report, AnalysisConfig, CsvCatalog, DerivationError, InsightKind, SchemaMapping,
    Section, TableKind, TableSetCache,
};
use rust_decimal::Decimal;
use tempfile::TempDir;

const MOM: &str = "\
YearMonth,Revenue,Normal_Orders,Customer,Return_Orders,Return
2010-12,900,90,45,0,0
2011-01,1000,99,50,1,-10
2011-02,1100,99,55,1,-12
2011-03,1210,99,60,1,-15
2011-04,1089,91,58,9,-200
2011-12,5000,400,200,4,-40
";

const AOV_ARPU: &str = "\
YearMonth,AOV,ARPU
2011-03,12.22,20.17
2011-04,11.97,18.5
";

const RFM: &str = "\
CustomerID,Recency,Frequency,Monetary,Total_Score,Category
GUEST,1,900,25000,15,Champions
12346,320,1,77183.6,3,Lost
12347,2,7,4310,14,Champions
12348,75,4,1797.24,9,Loyal
12349,18,1,1757.55,10,Potential Loyalist
12350,310,1,334.4,4,Lost
12352,36,8,2506.04,11,Loyal
12353,204,1,89,4,Lost
12354,232,1,1079.4,5,At Risk
12355,214,1,459.4,5,Loyal
12356,22,3,2811.43,12,Champions
";

const RETURN_PRODUCT: &str = "\
StockCode,Return_Amount,Return_Rate,Return_Count,Category
23166,-100,50,2,High-return items
84347,-100,12,3,Medium-return items
22423,-100,8,4,Low-return items
M,-90,100,1,100% return items(outlier)
POST,-90,15,2,
21108,-80,33,1,High-return items
";

const RETURN_CUSTOMER: &str = "\
CustomerID,Return_Amount,Return_Rate,Return_Count,Category
12346,-77183.6,100,1,100% return customer(outlier)
12352,-120,20,2,Medium-return customer
";

fn write(dir: &Path, relative: &str, body: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, body).expect("write fixture");
}

fn fixture() -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    write(dir.path(), "summary/mom.csv", MOM);
    write(dir.path(), "summary/aov_arpu.csv", AOV_ARPU);
    write(dir.path(), "summary/rfm.csv", RFM);
    write(dir.path(), "returns/return_product.csv", RETURN_PRODUCT);
    write(dir.path(), "returns/return_customer.csv", RETURN_CUSTOMER);
    dir
}

fn catalog(dir: &TempDir) -> CsvCatalog {
    let sources = SourcesConfig { base_dir: PathBuf::from(dir.path()), ..SourcesConfig::default() };
    CsvCatalog::new(sources, SchemaMapping::default())
}

#[test]
fn csv_exports_derive_a_full_dashboard() {
    let dir = fixture();
    let load = catalog(&dir).load();
    assert!(load.errors.is_empty());

    let report = derive_report(&load.tables, &AnalysisConfig::default());

    let kpi = &report.kpi.value;
    assert_eq!(kpi.period.as_ref().map(|period| period.as_str()), Some("2011-04"));
    assert_eq!(kpi.label.as_deref(), Some("April 2011"));
    assert_eq!(kpi.revenue_mom_pct, Decimal::from(-10));
    assert_eq!(kpi.return_rate, Decimal::from(9));
    assert_eq!(kpi.return_amount, Some(Decimal::from(200)));
    assert_eq!(kpi.arpu, Decimal::new(185, 1));
    assert_eq!(report.growth.value.points().len(), 4);

    assert_eq!(report.guests.value.guest_count, 1);
    assert_eq!(report.guests.value.guest_monetary, Decimal::from(25_000));
    assert_eq!(report.guests.value.others_count, 10);

    let categories: Vec<&str> =
        report.category_count.value.rows.iter().map(|row| row.category.as_str()).collect();
    assert_eq!(categories, vec!["Champions", "Loyal", "Potential Loyalist", "At Risk", "Lost"]);
    let revenue_pct: Decimal =
        report.category_revenue.value.rows.iter().map(|row| row.revenue_pct).sum();
    assert_eq!(revenue_pct, Decimal::ONE_HUNDRED);

    let products = &report.product_returns.value;
    assert_eq!(products.entities.len(), 6);
    assert_eq!(products.entities[4].category, "Unknown");
    assert_eq!(products.categories[0].category, "High-return items");
    assert_eq!(products.categories[0].entities, 2);
    assert_eq!(report.customer_returns.value.entities.len(), 2);
}

#[test]
fn insights_fire_in_rule_order() {
    let dir = fixture();
    let load = catalog(&dir).load();

    let report = derive_report(&load.tables, &AnalysisConfig::default());
    let kinds: Vec<InsightKind> = report.insights.iter().map(|insight| insight.kind).collect();

    assert_eq!(
        kinds,
        vec![InsightKind::ReturnSpike, InsightKind::ChurnRisk, InsightKind::TopLossProducts]
    );
    assert!(report.insights[0].message.starts_with("Return spike: 2011-04 returned"));
    assert!(report.insights[1].message.contains("4 customers (40.0%)"));
    assert!(report.insights[2]
        .message
        .starts_with("Top loss products: 23166, 84347, 22423, M, POST account"));
    assert!(report.insights[2].message.contains("(total $480)"));
}

#[test]
fn absent_optional_tables_only_degrade_their_sections() {
    let dir = fixture();
    let load = catalog(&dir).load();

    let report = derive_report(&load.tables, &AnalysisConfig::default());
    let diagnostics = report.diagnostics();

    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].section, Section::AbnormalProducts);
    assert_eq!(
        diagnostics[0].error,
        DerivationError::missing_table(TableKind::AbnormalProducts)
    );
    assert!(report.rejected_tables.is_empty());
}

#[test]
fn malformed_export_is_reported_once_and_other_sections_survive() {
    let dir = fixture();
    write(dir.path(), "summary/rfm.csv", "CustomerID,Monetary,Category\n12346,10\n");
    let load = catalog(&dir).load();

    let report = derive_report(&load.tables, &AnalysisConfig::default());

    assert_eq!(load.errors.len(), 1);
    assert_eq!(report.rejected_tables.len(), 1);
    assert!(report.rejected_tables[0].is_fatal());
    assert_eq!(report.kpi.value.period.as_ref().map(|period| period.as_str()), Some("2011-04"));
    assert!(report.category_count.value.rows.is_empty());
    assert!(!report.insights.iter().any(|insight| insight.kind == InsightKind::ChurnRisk));
}

#[test]
fn cached_loads_give_identical_reports() {
    let dir = fixture();
    let catalog = catalog(&dir);
    let mut cache = TableSetCache::new();
    let config = AnalysisConfig::default();

    let first = derive_report(&cache.get_or_load(&catalog).tables, &config);
    let second = derive_report(&cache.get_or_load(&catalog).tables, &config);

    assert_eq!(cache.loads(), 1);
    assert_eq!(first, second);
}

#[test]
fn report_serializes_every_section() {
    let dir = fixture();
    let load = catalog(&dir).load();
    let report = derive_report(&load.tables, &AnalysisConfig::default());

    let json = serde_json::to_value(&report).expect("serialize report");

    for section in [
        "kpi",
        "growth",
        "return_trend",
        "guests",
        "category_revenue",
        "category_count",
        "scatter",
        "product_returns",
        "customer_returns",
        "abnormal_products",
    ] {
        assert!(json[section]["value"].is_object() || json[section]["value"].is_array(), "{section}");
    }
    assert_eq!(json["kpi"]["value"]["period"], "2011-04");
    assert_eq!(json["abnormal_products"]["diagnostics"][0]["kind"], "missing_table");
    assert_eq!(json["insights"][0]["kind"], "return_spike");
}
