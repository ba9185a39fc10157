//! Standalone HTML map document.
//!
//! The page loads the Kepler.gl UMD bundle and its peer libraries from a
//! CDN, then adds the embedded dataset with the embedded config.

use std::fmt::Write as _;

use serde::Serialize;

use crate::RenderError;

/// Kepler.gl UMD bundle.
pub const KEPLER_UMD_URL: &str = "https://unpkg.com/kepler.gl@2.5.5/umd/keplergl.min.js";

const PEER_SCRIPTS: &[&str] = &[
    "https://unpkg.com/react@16.8.4/umd/react.production.min.js",
    "https://unpkg.com/react-dom@16.8.4/umd/react-dom.production.min.js",
    "https://unpkg.com/redux@3.7.2/dist/redux.js",
    "https://unpkg.com/react-redux@7.1.3/dist/react-redux.min.js",
    "https://unpkg.com/styled-components@4.1.3/dist/styled-components.min.js",
];

const STYLESHEETS: &[&str] = &[
    "https://d1a3f4spazzrp4.cloudfront.net/kepler.gl/uber-fonts/4.0.0/superfine.css",
    "https://api.tiles.mapbox.com/mapbox-gl-js/v1.1.1/mapbox-gl.css",
];

/// Serializes `value` for embedding inside a `<script>` element. `<` is
/// escaped so the payload cannot close the element.
///
/// # Errors
///
/// Returns [`RenderError::Json`] if serialization fails.
pub fn script_json<T: Serialize>(value: &T) -> Result<String, RenderError> {
    Ok(serde_json::to_string(value)?.replace('<', "\\u003c"))
}

/// Renders the document. `dataset` is a GeoJSON `FeatureCollection`,
/// `config` a Kepler.gl config, and `label` both the dataset id and label.
///
/// # Errors
///
/// Returns [`RenderError::Json`] if a value cannot be serialized.
pub fn render_html<D: Serialize, C: Serialize>(
    title: &str,
    label: &str,
    dataset: &D,
    config: &C,
    mapbox_token: Option<&str>,
) -> Result<String, RenderError> {
    let mut head = String::new();
    for href in STYLESHEETS {
        let _ = writeln!(head, "    <link rel=\"stylesheet\" href=\"{href}\" />");
    }
    for src in PEER_SCRIPTS.iter().chain(std::iter::once(&KEPLER_UMD_URL)) {
        let _ = writeln!(head, "    <script src=\"{src}\"></script>");
    }

    let dataset = script_json(dataset)?;
    let config = script_json(config)?;
    let label = script_json(&label)?;
    let token = script_json(&mapbox_token.unwrap_or_default())?;
    let title = html_escape(title);

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
  <head>
    <meta charset="UTF-8" />
    <title>{title}</title>
{head}    <style>
      html, body, #app {{ margin: 0; padding: 0; width: 100%; height: 100%; overflow: hidden; }}
    </style>
  </head>
  <body>
    <div id="app"></div>
    <script>
      const DATASET = {dataset};
      const CONFIG = {config};
      const LABEL = {label};
      const MAPBOX_TOKEN = {token};

      (function () {{
        const reducers = Redux.combineReducers({{
          keplerGl: KeplerGl.keplerGlReducer.initialState({{
            uiState: {{ readOnly: false, currentModal: null }}
          }})
        }});
        const store = Redux.createStore(
          reducers,
          {{}},
          Redux.applyMiddleware(KeplerGl.enhanceReduxMiddleware([]))
        );

        const App = function () {{
          return React.createElement(KeplerGl.KeplerGl, {{
            id: "map",
            mapboxApiAccessToken: MAPBOX_TOKEN,
            width: window.innerWidth,
            height: window.innerHeight
          }});
        }};

        ReactDOM.render(
          React.createElement(ReactRedux.Provider, {{ store: store }}, React.createElement(App)),
          document.getElementById("app")
        );

        store.dispatch(
          KeplerGl.addDataToMap({{
            datasets: {{
              info: {{ id: LABEL, label: LABEL }},
              data: KeplerGl.processGeojson(DATASET)
            }},
            config: CONFIG,
            options: {{ centerMap: false, readOnly: false }}
          }})
        );
      }})();
    </script>
  </body>
</html>
"#
    ))
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_json_cannot_close_script() {
        let payload = serde_json::json!({ "name": "</script><script>alert(1)" });
        let html = render_html("t", "l", &payload, &serde_json::json!({}), None).unwrap();

        assert_eq!(html.matches("</script>").count(), PEER_SCRIPTS.len() + 2);
        assert!(html.contains("\\u003c/script>"));
    }

    #[test]
    fn loads_kepler_bundle_and_embeds_config() {
        let config = serde_json::json!({ "version": "v1" });
        let html = render_html(
            "NYC <taxi>",
            "NYC Taxi Pickup by Day",
            &serde_json::json!({ "type": "FeatureCollection", "features": [] }),
            &config,
            Some("pk.test"),
        )
        .unwrap();

        assert!(html.contains(KEPLER_UMD_URL));
        assert!(html.contains(r#"const CONFIG = {"version":"v1"};"#));
        assert!(html.contains(r#"const LABEL = "NYC Taxi Pickup by Day";"#));
        assert!(html.contains(r#"const MAPBOX_TOKEN = "pk.test";"#));
        assert!(html.contains("<title>NYC &lt;taxi&gt;</title>"));
    }
}
