//! Source adapter tests against mocked registries.
//!
//! Each adapter is exercised directly: the request shape it sends, the
//! payload it parses, and how HTTP statuses map onto the fetch taxonomy.

use chrono::Utc;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use bankruptcy_scoring::errors::FetchError;
use bankruptcy_scoring::models::{DebtKind, LeadRecord, SourcePayload};
use bankruptcy_scoring::sources::courts::CourtAdapter;
use bankruptcy_scoring::sources::fedresurs::FedresursAdapter;
use bankruptcy_scoring::sources::fssp::FsspAdapter;
use bankruptcy_scoring::sources::nalog::NalogAdapter;
use bankruptcy_scoring::sources::rosreestr::RosreestrAdapter;
use bankruptcy_scoring::sources::SourceAdapter;

fn lead(inn: Option<&str>) -> LeadRecord {
    LeadRecord {
        lead_id: "cafebabe00000000".to_string(),
        phone: "+79161234567".to_string(),
        name: "Иванов Иван Иванович".to_string(),
        inn: inn.map(str::to_string),
        inn_invalid: false,
        kpp: None,
        ogrn: None,
        dob: None,
        email: None,
        address: None,
        region: None,
        debt_amount: 0.0,
        revenue: None,
        source_tags: vec!["generic".to_string()],
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn fssp_queries_by_inn_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("type", "ip"))
        .and(query_param("inn", "772345678901"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {
                "items": [{
                    "creditor": "ПАО Сбербанк",
                    "debt_amount": 300000.0,
                    "status": "Исполнительное производство",
                    "case_number": "12345/24/77001-ИП"
                }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = FsspAdapter::new(server.uri());
    let client = reqwest::Client::new();
    let payload = adapter
        .fetch(&client, &lead(Some("772345678901")))
        .await
        .unwrap()
        .unwrap();

    let SourcePayload::Enforcement(data) = payload else {
        panic!("expected an enforcement payload");
    };
    assert_eq!(data.debts.len(), 1);
    assert_eq!(data.total_debt, 300000.0);
    assert_eq!(data.active_cases, 1);
    assert_eq!(data.debts[0].kind, DebtKind::Bank);
}

#[tokio::test]
async fn fssp_falls_back_to_name_search_without_inn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("type", "physical"))
        .and(query_param("lastname", "Иванов"))
        .and(query_param("firstname", "Иван"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": {"items": []}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let adapter = FsspAdapter::new(server.uri());
    let client = reqwest::Client::new();
    let payload = adapter.fetch(&client, &lead(None)).await.unwrap().unwrap();

    let SourcePayload::Enforcement(data) = payload else {
        panic!("expected an enforcement payload");
    };
    assert!(data.debts.is_empty());
}

#[tokio::test]
async fn fedresurs_posts_the_search_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/backend/persons"))
        .and(body_partial_json(json!({
            "searchType": "parties",
            "inn": "772345678901"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"searchResult": []}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let adapter = FedresursAdapter::new(server.uri());
    let client = reqwest::Client::new();
    let payload = adapter
        .fetch(&client, &lead(Some("772345678901")))
        .await
        .unwrap()
        .unwrap();

    let SourcePayload::Bankruptcy(data) = payload else {
        panic!("expected a bankruptcy payload");
    };
    assert!(!data.is_bankrupt);
}

#[tokio::test]
async fn rosreestr_is_skipped_without_an_inn() {
    let adapter = RosreestrAdapter::new("http://127.0.0.1:1".to_string());
    let client = reqwest::Client::new();

    let no_inn = lead(None);
    assert!(!adapter.applicable(&no_inn));
    // Skip happens before any request leaves the process.
    assert_eq!(adapter.fetch(&client, &no_inn).await.unwrap(), None);
}

#[tokio::test]
async fn nalog_reads_absence_as_an_inactive_inn() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inn/772345678901"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let adapter = NalogAdapter::new(server.uri());
    let client = reqwest::Client::new();
    let payload = adapter
        .fetch(&client, &lead(Some("772345678901")))
        .await
        .unwrap()
        .unwrap();

    let SourcePayload::Tax(data) = payload else {
        panic!("expected a tax payload");
    };
    assert!(!data.inn_active);
}

#[tokio::test]
async fn court_result_table_parses_into_orders() {
    let html = r#"
        <html><body>
        <table class="custom_table">
          <tr><th>Номер</th><th>Тип</th><th>Суд</th><th>Судья</th><th>Стороны</th><th>Статус</th><th>Дата</th></tr>
          <tr>
            <td>А40-12345/2024</td>
            <td>Судебный приказ</td>
            <td>АС города Москвы</td>
            <td>Иванова И.И.</td>
            <td>Истец: ПАО Сбербанк</td>
            <td>Рассматривается</td>
            <td>решение от 15.03.2024</td>
          </tr>
        </table>
        </body></html>"#;

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/Kad/SearchInstances"))
        .and(query_param("Cases.Participant.Name", "Иванов Иван Иванович"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .expect(1)
        .mount(&server)
        .await;

    let adapter = CourtAdapter::new(server.uri());
    let client = reqwest::Client::new();
    let payload = adapter.fetch(&client, &lead(None)).await.unwrap().unwrap();

    let SourcePayload::CourtRecords(data) = payload else {
        panic!("expected a court payload");
    };
    assert_eq!(data.orders.len(), 1);
    assert_eq!(data.orders[0].case_number, "А40-12345/2024");
    assert_eq!(
        data.orders[0].decided_at,
        chrono::NaiveDate::from_ymd_opt(2024, 3, 15)
    );
}

#[tokio::test]
async fn http_statuses_map_onto_the_fetch_taxonomy() {
    let cases: &[(u16, fn(&FetchError) -> bool)] = &[
        (404, |e| matches!(e, FetchError::NotFound)),
        (429, |e| matches!(e, FetchError::RateLimited(_))),
        (403, |e| matches!(e, FetchError::Network(_))),
        (500, |e| matches!(e, FetchError::Network(_))),
    ];

    for (status, check) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(*status))
            .mount(&server)
            .await;

        let adapter = FsspAdapter::new(server.uri());
        let client = reqwest::Client::new();
        let err = adapter
            .fetch(&client, &lead(Some("772345678901")))
            .await
            .unwrap_err();
        assert!(check(&err), "status {} mapped to {:?}", status, err);
    }
}
