use std::fs;
use std::path::Path;

use pws_crawler::{
    BackoffConfig, CancelToken, Crawler, CrawlerConfig, DelayRange, PacingConfig, PageParser,
    SampleSize, StopReason, Url, Value,
};
use pws_scraper::TargetSpec;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fixture(name: &str) -> String {
    fs::read_to_string(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name))
        .unwrap()
}

fn target(base_url: &str) -> TargetSpec {
    let mut target = TargetSpec::from_yaml(&fixture("products.yaml")).unwrap();
    target.base_url = base_url.to_string();
    target
}

fn text(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_text)
}

#[test]
fn product_fields_from_listing_markup() {
    let target = target("http://127.0.0.1:5000");
    let listing = target.listings[0].build(&target.base().unwrap()).unwrap();

    let page = fixture("products_1.html");
    let items = listing.parser.items(&page);
    assert_eq!(items.len(), 2);

    let record = listing.schema.apply(&items[0]);
    assert_eq!(record.failed, 0);
    let record = record.record;
    assert_eq!(text(record.get("name")), Some("云计算服务1"));
    assert_eq!(text(record.get("link")), Some("http://127.0.0.1:5000/product/1"));
    assert_eq!(text(record.get("category")), Some("存储"));
    assert_eq!(text(record.get("price")), Some("¥1234.56"));
    match record.get("specs") {
        Some(Value::Map(specs)) => {
            assert_eq!(text(specs.get("CPU")), Some("8核"));
            assert_eq!(text(specs.get("内存")), Some("32GB"));
            assert_eq!(text(specs.get("存储")), Some("500GB SSD"));
        }
        other => panic!("unexpected specs {other:?}"),
    }
}

#[test]
fn detail_fields_from_product_markup() {
    let target = target("http://127.0.0.1:5000");
    let base = target.base().unwrap();
    let detail = target.listings[0].detail.as_ref().unwrap().build(&base).unwrap();

    let items = detail.parser.items(&fixture("product_2.html"));
    let record = detail.schema.apply(&items[0]).record;

    assert_eq!(
        text(record.get("description")),
        Some("这是存储类产品2的详细描述，适用于各种企业场景")
    );
    assert_eq!(record.get("views"), Some(&Value::Integer(102)));
}

#[test]
fn pagination_signal_follows_next_link() {
    let target = target("http://127.0.0.1:5000");
    let listing = target.listings[0].build(&target.base().unwrap()).unwrap();

    assert_eq!(
        listing.parser.next_page(&fixture("products_1.html")),
        pws_crawler::NextPage::Present
    );
    assert_eq!(
        listing.parser.next_page(&fixture("products_2.html")),
        pws_crawler::NextPage::Absent
    );
}

#[tokio::test]
async fn crawls_and_enriches_over_http() {
    let server = MockServer::start().await;
    for page in 1..=2 {
        Mock::given(method("GET"))
            .and(path("/products"))
            .and(query_param("page", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(fixture(&format!("products_{page}.html")), "text/html; charset=utf-8"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    for id in 1..=3 {
        Mock::given(method("GET"))
            .and(path(format!("/product/{id}")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(fixture(&format!("product_{id}.html")), "text/html; charset=utf-8"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let target = target(&server.uri());
    let base = target.base().unwrap();
    let spec = &target.listings[0];
    let listing = spec.build(&base).unwrap();
    let detail = spec.detail.as_ref().unwrap();
    let detail_target = detail.build(&base).unwrap();

    let crawler = Crawler::new(CrawlerConfig {
        pacing: PacingConfig::none(),
        backoff: BackoffConfig {
            base: DelayRange::ZERO,
            ..Default::default()
        },
        seed: Some(7),
        ..Default::default()
    })
    .unwrap();
    let output = crawler
        .run(&listing, Some((&detail_target, detail.sample)), &CancelToken::new())
        .await;

    assert_eq!(output.records.len(), 3);
    assert_eq!(output.report.stop, Some(StopReason::NoNextPage { page: 2 }));
    assert_eq!(output.report.details_enriched, 3);
    assert!(output.report.is_complete());

    let names = output
        .records
        .iter()
        .map(|r| text(r.get("name")).unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["云计算服务1", "数据库服务2", "安全服务3"]);
    let views = output
        .records
        .iter()
        .map(|r| r.get("views").cloned())
        .collect::<Vec<_>>();
    assert_eq!(
        views,
        vec![
            Some(Value::Integer(101)),
            Some(Value::Integer(102)),
            Some(Value::Integer(103))
        ]
    );
    assert_eq!(
        Url::parse(text(output.records[2].get("link")).unwrap()).unwrap().path(),
        "/product/3"
    );
}

#[test]
fn demo_target_builds_users_and_news_views() {
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/cloud.yaml");
    let target = TargetSpec::from_path(&demo).unwrap();
    let base = target.base().unwrap();
    for spec in &target.listings {
        spec.build(&base).unwrap();
    }

    let users = target.listing("users").unwrap();
    let listing = users.build(&base).unwrap();
    let rows = listing.parser.items(
        r#"<table><thead><tr><th>ID</th></tr></thead><tbody>
        <tr><td>7</td><td>user7</td><td>用户7</td><td>管理员</td><td>技术部</td><td>2023-01-07</td></tr>
        </tbody></table>"#,
    );
    assert_eq!(rows.len(), 1);
    let row = listing.schema.apply(&rows[0]);
    assert_eq!(row.failed, 0);
    assert_eq!(row.record.get("id"), Some(&Value::Integer(7)));
    assert_eq!(text(row.record.get("username")), Some("user7"));

    let detail = users.detail.as_ref().unwrap();
    assert_eq!(detail.sample, SampleSize::Between { min: 3, max: 5 });
    assert_eq!(
        detail.build(&base).unwrap().detail_url(&row.record).unwrap().as_str(),
        "http://127.0.0.1:5000/user/7"
    );

    let news = target.listing("news").unwrap().build(&base).unwrap();
    let items = news.parser.items(
        r#"<div class="news-item"><h3><a href="/news/1">新闻1</a></h3>
        <p>作者: 编辑1 | 浏览量: 321</p></div>"#,
    );
    let item = news.schema.apply(&items[0]).record;
    assert_eq!(item.get("views"), Some(&Value::Integer(321)));
}
