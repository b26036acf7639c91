//! Built-in component catalog.
//!
//! Read-only descriptors for the monitoring components the installer knows
//! how to deploy. The surrounding system may substitute its own catalog; the
//! installer only ever sees a [`ComponentSpec`].

use once_cell::sync::Lazy;

use crate::model::ComponentSpec;

fn spec(
    id: &str,
    name: &str,
    kind: &str,
    version: &str,
    download_url: &str,
    config_path: &str,
    service_name: &str,
    ports: &[u16],
) -> ComponentSpec {
    ComponentSpec {
        id: id.to_string(),
        name: name.to_string(),
        kind: kind.to_string(),
        version: version.to_string(),
        download_url: download_url.to_string(),
        config_path: config_path.to_string(),
        service_name: service_name.to_string(),
        ports: ports.to_vec(),
    }
}

static CATALOG: Lazy<Vec<ComponentSpec>> = Lazy::new(|| {
    vec![
        spec(
            "node_exporter",
            "Node Exporter",
            "collector",
            "1.8.2",
            "https://github.com/prometheus/node_exporter/releases/download/v1.8.2/node_exporter-1.8.2.linux-amd64.tar.gz",
            "/etc/node_exporter/",
            "node_exporter",
            &[9100],
        ),
        spec(
            "categraf",
            "Categraf",
            "collector",
            "0.3.60",
            "https://github.com/flashcatcloud/categraf/releases/download/v0.3.60/categraf-v0.3.60-linux-amd64.tar.gz",
            "/opt/categraf/conf/",
            "categraf",
            &[9100, 8080],
        ),
        spec(
            "snmp_exporter",
            "SNMP Exporter",
            "collector",
            "0.25.0",
            "https://github.com/prometheus/snmp_exporter/releases/download/v0.25.0/snmp_exporter-0.25.0.linux-amd64.tar.gz",
            "/etc/snmp_exporter/",
            "snmp_exporter",
            &[9116],
        ),
        spec(
            "vmagent",
            "VMAgent",
            "collector",
            "1.97.1",
            "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/v1.97.1/vmutils-linux-amd64-v1.97.1.tar.gz",
            "/etc/vmagent/",
            "vmagent",
            &[8429],
        ),
        spec(
            "victoriametrics",
            "VictoriaMetrics",
            "storage",
            "1.97.1",
            "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/v1.97.1/victoria-metrics-linux-amd64-v1.97.1.tar.gz",
            "/etc/victoriametrics/",
            "victoriametrics",
            &[8428],
        ),
        spec(
            "grafana",
            "Grafana",
            "visualization",
            "11.3.0",
            "https://dl.grafana.com/oss/release/grafana-11.3.0.linux-amd64.tar.gz",
            "/etc/grafana/",
            "grafana-server",
            &[3000],
        ),
        spec(
            "vmalert",
            "VMAlert",
            "alerting",
            "1.97.1",
            "https://github.com/VictoriaMetrics/VictoriaMetrics/releases/download/v1.97.1/vmutils-linux-amd64-v1.97.1.tar.gz",
            "/etc/vmalert/",
            "vmalert",
            &[8880],
        ),
        spec(
            "alertmanager",
            "Alertmanager",
            "alerting",
            "0.27.0",
            "https://github.com/prometheus/alertmanager/releases/download/v0.27.0/alertmanager-0.27.0.linux-amd64.tar.gz",
            "/etc/alertmanager/",
            "alertmanager",
            &[9093, 9094],
        ),
    ]
});

/// All known components.
pub fn all() -> &'static [ComponentSpec] {
    &CATALOG
}

/// Look a component up by slug.
pub fn find(id: &str) -> Option<&'static ComponentSpec> {
    CATALOG.iter().find(|c| c.id == id)
}
