// src/robot/profile.rs
//
// Selectors and layouts of the two portal variants.

use crate::model::PortalVariant;

/// Where each header field sits in a results-table row.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub emission_date: usize,
    pub invoice_number: usize,
    pub period_start: usize,
    pub period_end: usize,
    pub amount: usize,
    pub contract: Option<usize>,
    pub cups: usize,
    pub sequence: Option<usize>,
    pub status: Option<usize>,
    pub installment: Option<usize>,
    pub invoice_type: Option<usize>,
}

impl ColumnMap {
    /// Cells a row must have for this map to apply.
    pub fn width(&self) -> usize {
        [
            Some(self.emission_date),
            Some(self.invoice_number),
            Some(self.period_start),
            Some(self.period_end),
            Some(self.amount),
            self.contract,
            Some(self.cups),
            self.sequence,
            self.status,
            self.installment,
            self.invoice_type,
        ]
        .into_iter()
        .flatten()
        .max()
        .map_or(0, |m| m + 1)
    }
}

#[derive(Debug, Clone)]
pub struct TableLayout {
    pub container: String,
    pub rows: String,
    /// Cell selector relative to a row.
    pub cells: String,
    pub next: String,
    /// Text shown in cells while the grid is still loading.
    pub loading_token: String,
    pub columns: ColumnMap,
    /// Row-relative element carrying the download token, and its attribute.
    pub token_source: (String, String),
}

/// How a document kind's trigger is found inside a row.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// `{selector}[{attribute}="{token}"]`
    Token { selector: String, attribute: String },
    /// Element whose visible text contains the label.
    Label { selector: String, label: String },
}

#[derive(Debug, Clone)]
pub struct DocumentTriggers {
    pub structured_text: Option<Trigger>,
    pub rendered: Option<Trigger>,
    pub presentation: Option<Trigger>,
}

#[derive(Debug, Clone)]
pub struct LoginSelectors {
    pub form: String,
    pub username: String,
    pub password: String,
    pub submit: String,
    /// Appears only once the session is authenticated.
    pub success: String,
    pub error_banner: String,
    pub cookie_button: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EntitySelectors {
    pub switch_button: String,
    pub items: String,
    pub active_item: String,
    pub close_button: String,
}

#[derive(Debug, Clone)]
pub struct SearchSelectors {
    pub filter_container: String,
    pub group_button: Option<String>,
    pub cups_button: String,
    pub search_box: String,
    pub option: String,
    pub date_from_label: String,
    pub date_to_label: String,
    pub limit_button: String,
    pub submit: String,
    pub no_results: String,
}

#[derive(Debug, Clone)]
pub struct PortalProfile {
    pub variant: PortalVariant,
    pub login: LoginSelectors,
    pub entities: Option<EntitySelectors>,
    pub search: SearchSelectors,
    pub table: TableLayout,
    pub documents: DocumentTriggers,
}

impl PortalProfile {
    pub fn for_variant(variant: PortalVariant) -> Self {
        match variant {
            PortalVariant::Client => Self::client(),
            PortalVariant::Distribution => Self::distribution(),
        }
    }

    pub fn client() -> Self {
        Self {
            variant: PortalVariant::Client,
            login: LoginSelectors {
                form: "form.slds-form".into(),
                username: "input[name=\"Username\"]".into(),
                password: "input[name=\"password\"]".into(),
                submit: "button:has-text(\"ACCEDER\")".into(),
                success: "#truste-consent-button".into(),
                error_banner: "div[class*=\"error\"]".into(),
                cookie_button: Some("#truste-consent-button".into()),
            },
            entities: None,
            search: SearchSelectors {
                filter_container: "div.filter-padd-container".into(),
                group_button: Some("button[name=\"periodo\"]:has-text(\"Grupo empresarial\")".into()),
                cups_button: "button[name=\"periodo\"]:has-text(\"CUPS\")".into(),
                search_box: "input[placeholder=\"Buscar\"]".into(),
                option: "span[role=\"option\"]".into(),
                date_from_label: "Fecha de emisión desde".into(),
                date_to_label: "Fecha de emisión hasta".into(),
                limit_button: "button[name=\"limite\"]".into(),
                submit: "button:has-text(\"Buscar\")".into(),
                no_results: "div.no-results".into(),
            },
            table: TableLayout {
                container: "div.invoice-table-container".into(),
                rows: "table.invoice-table tbody tr".into(),
                cells: "td".into(),
                next: "button[title=\"Siguiente\"]".into(),
                loading_token: "Cargando".into(),
                columns: ColumnMap {
                    emission_date: 0,
                    invoice_number: 1,
                    period_start: 2,
                    period_end: 3,
                    amount: 4,
                    contract: Some(5),
                    cups: 6,
                    sequence: Some(7),
                    status: Some(8),
                    installment: Some(9),
                    invoice_type: Some(10),
                },
                token_source: ("button[name=\"pdf\"]".into(), "value".into()),
            },
            documents: DocumentTriggers {
                structured_text: Some(Trigger::Label {
                    selector: "button".into(),
                    label: "XML".into(),
                }),
                rendered: Some(Trigger::Token {
                    selector: "button[name=\"pdf\"]".into(),
                    attribute: "value".into(),
                }),
                presentation: Some(Trigger::Label {
                    selector: "button".into(),
                    label: "HTML".into(),
                }),
            },
        }
    }

    pub fn distribution() -> Self {
        Self {
            variant: PortalVariant::Distribution,
            login: LoginSelectors {
                form: "form.login-form".into(),
                username: "input[name=\"username\"]".into(),
                password: "input[name=\"password\"]".into(),
                submit: "button[type=\"submit\"]".into(),
                success: "button[title=\"Cambiar rol\"]".into(),
                error_banner: "div.login-error".into(),
                cookie_button: Some("#onetrust-accept-btn-handler".into()),
            },
            entities: Some(EntitySelectors {
                switch_button: "button[title=\"Cambiar rol\"]".into(),
                items: "ul.role-list li span.role-name".into(),
                active_item: "ul.role-list li.is-active span.role-name".into(),
                close_button: "button[title=\"Cerrar\"]".into(),
            }),
            search: SearchSelectors {
                filter_container: "div.search-filters".into(),
                group_button: None,
                cups_button: "button[name=\"cups\"]".into(),
                search_box: "input[placeholder=\"Buscar\"]".into(),
                option: "span[role=\"option\"]".into(),
                date_from_label: "Desde".into(),
                date_to_label: "Hasta".into(),
                limit_button: "button[name=\"numResultados\"]".into(),
                submit: "button:has-text(\"Buscar\")".into(),
                no_results: "div.empty-results".into(),
            },
            table: TableLayout {
                container: "div.results-table".into(),
                rows: "div.results-table table tbody tr".into(),
                cells: "td".into(),
                next: "button.pagination-next".into(),
                loading_token: "Cargando".into(),
                columns: ColumnMap {
                    cups: 0,
                    invoice_number: 1,
                    emission_date: 2,
                    period_start: 3,
                    period_end: 4,
                    amount: 5,
                    status: Some(6),
                    invoice_type: Some(7),
                    contract: None,
                    sequence: None,
                    installment: None,
                },
                token_source: ("button.download-pdf".into(), "data-invoice".into()),
            },
            documents: DocumentTriggers {
                structured_text: None,
                rendered: Some(Trigger::Token {
                    selector: "button.download-pdf".into(),
                    attribute: "data-invoice".into(),
                }),
                presentation: None,
            },
        }
    }
}
