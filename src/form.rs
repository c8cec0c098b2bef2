//! Form building blocks.
//!
//! Each builder returns an [`Html`] fragment; interactive widgets carry their
//! own small inline script.

use crate::cart::LineItemInput;
use crate::html::{field_id, js_string, script, Attrs, Html};
use crate::validate::FormErrors;

pub const CSRF_FIELD: &str = "csrf_token";

const INPUT_KINDS: &[&str] = &[
    "text", "email", "password", "number", "date", "tel", "url", "search", "hidden",
];

/// Opening `<form>` tag. Anything other than GET carries the CSRF token.
pub fn form_open(action: &str, method: &str, csrf_token: &str, attrs: &Attrs) -> Html {
    let method = method.to_ascii_uppercase();
    let wire_method = if method == "GET" { "get" } else { "post" };

    let mut out = Html::trusted("<form action=\"");
    out.push_text(action);
    out.push_trusted("\" method=\"");
    out.push_trusted(wire_method);
    out.push_trusted("\"");
    out.push(attrs.render_except(&["action", "method"]));
    out.push_trusted(">");

    if method != "GET" {
        out.push(csrf_field(csrf_token));
    }
    if matches!(method.as_str(), "PUT" | "PATCH" | "DELETE") {
        out.push(form_hidden("_method", &method));
    }

    out
}

pub fn form_close() -> Html {
    Html::trusted("</form>")
}

pub fn form_hidden(name: &str, value: &str) -> Html {
    let mut out = Html::trusted("<input type=\"hidden\" name=\"");
    out.push_text(name);
    out.push_trusted("\" value=\"");
    out.push_text(value);
    out.push_trusted("\">");
    out
}

pub fn csrf_field(token: &str) -> Html {
    form_hidden(CSRF_FIELD, token)
}

fn field_open(name: &str, label: &str, error: Option<&str>) -> Html {
    let mut out = Html::trusted(if error.is_some() {
        "<div class=\"field has-error\">"
    } else {
        "<div class=\"field\">"
    });

    if !label.is_empty() {
        out.push_trusted("<label for=\"");
        out.push_trusted(&field_id(name));
        out.push_trusted("\">");
        out.push_text(label);
        out.push_trusted("</label>");
    }

    out
}

fn field_close(error: Option<&str>) -> Html {
    let mut out = Html::new();

    if let Some(error) = error {
        out.push_trusted("<p class=\"field-error\">");
        out.push_text(error);
        out.push_trusted("</p>");
    }
    out.push_trusted("</div>");

    out
}

/// Labelled `<input>`. Password values are never echoed back.
pub fn form_input(
    kind: &str,
    name: &str,
    label: &str,
    value: &str,
    attrs: &Attrs,
    error: Option<&str>,
) -> Html {
    let kind = if INPUT_KINDS.contains(&kind) { kind } else { "text" };
    let value = if kind == "password" { "" } else { value };

    let mut out = field_open(name, label, error);
    out.push_trusted("<input type=\"");
    out.push_trusted(kind);
    out.push_trusted("\" id=\"");
    out.push_trusted(&field_id(name));
    out.push_trusted("\" name=\"");
    out.push_text(name);
    out.push_trusted("\" value=\"");
    out.push_text(value);
    out.push_trusted("\"");
    if error.is_some() {
        out.push_trusted(" aria-invalid=\"true\"");
    }
    out.push(attrs.render_except(&["type", "id", "name", "value"]));
    out.push_trusted(">");
    out.push(field_close(error));

    out
}

/// `<textarea>`; with a `maxlength` attribute a live character counter is added.
pub fn form_textarea(
    name: &str,
    label: &str,
    value: &str,
    attrs: &Attrs,
    error: Option<&str>,
) -> Html {
    let id = field_id(name);

    let mut out = field_open(name, label, error);
    out.push_trusted("<textarea id=\"");
    out.push_trusted(&id);
    out.push_trusted("\" name=\"");
    out.push_text(name);
    out.push_trusted("\"");
    out.push(attrs.render_except(&["id", "name"]));
    out.push_trusted(">");
    out.push_text(value);
    out.push_trusted("</textarea>");

    if let Some(max) = attrs.get("maxlength").and_then(|m| m.parse::<usize>().ok()) {
        let counter_id = format!("{id}-count");
        let used = value.chars().count();

        out.push_trusted(&format!(
            "<small class=\"char-count\" id=\"{counter_id}\">{used}/{max}</small>"
        ));
        out.push(script(&format!(
            "(function(){{var t=document.getElementById({t}),c=document.getElementById({c});\
             if(!t||!c)return;t.addEventListener('input',function(){{\
             c.textContent=t.value.length+'/'+{max};}});}})();",
            t = js_string(&id),
            c = js_string(&counter_id),
        )));
    }

    out.push(field_close(error));
    out
}

/// `<select>` over `(value, text)` pairs.
pub fn form_select(
    name: &str,
    label: &str,
    options: &[(&str, &str)],
    selected: &str,
    attrs: &Attrs,
    error: Option<&str>,
) -> Html {
    let mut out = field_open(name, label, error);
    out.push_trusted("<select id=\"");
    out.push_trusted(&field_id(name));
    out.push_trusted("\" name=\"");
    out.push_text(name);
    out.push_trusted("\"");
    out.push(attrs.render_except(&["id", "name"]));
    out.push_trusted(">");

    for (value, text) in options {
        out.push_trusted("<option value=\"");
        out.push_text(value);
        out.push_trusted("\"");
        if *value == selected {
            out.push_trusted(" selected");
        }
        out.push_trusted(">");
        out.push_text(text);
        out.push_trusted("</option>");
    }

    out.push_trusted("</select>");
    out.push(field_close(error));
    out
}

pub fn form_checkbox(name: &str, label: &str, checked: bool, attrs: &Attrs) -> Html {
    let mut out = Html::trusted("<div class=\"field checkbox\"><label><input type=\"checkbox\" id=\"");
    out.push_trusted(&field_id(name));
    out.push_trusted("\" name=\"");
    out.push_text(name);
    out.push_trusted("\" value=\"1\"");
    if checked {
        out.push_trusted(" checked");
    }
    out.push(attrs.render_except(&["type", "id", "name", "value", "checked"]));
    out.push_trusted("> ");
    out.push_text(label);
    out.push_trusted("</label></div>");
    out
}

pub fn form_submit(label: &str, attrs: &Attrs) -> Html {
    let attrs = if attrs.has("class") {
        attrs.clone()
    } else {
        attrs.clone().class("btn btn-primary")
    };

    let mut out = Html::trusted("<button type=\"submit\"");
    out.push(attrs.render_except(&["type"]));
    out.push_trusted(">");
    out.push_text(label);
    out.push_trusted("</button>");
    out
}

/// Summary list of everything that failed, for fields without their own slot.
pub fn form_errors(errors: &FormErrors) -> Html {
    if errors.is_empty() {
        return Html::new();
    }

    let mut out = Html::trusted("<ul class=\"form-errors\" role=\"alert\">");
    for (_, message) in errors.iter() {
        out.push_trusted("<li>");
        out.push_text(message);
        out.push_trusted("</li>");
    }
    out.push_trusted("</ul>");
    out
}

/// Editable table of billing rows; "Add row" clones a blank row client side.
///
/// Inputs are named `{name}[{i}][description]`, `[quantity]` and `[unit_price]`.
pub fn form_line_items(name: &str, rows: &[LineItemInput]) -> Html {
    let table_id = format!("{}-rows", field_id(name));
    let blank = LineItemInput {
        quantity: "1".into(),
        ..Default::default()
    };

    let row = |index: &str, item: &LineItemInput| {
        let LineItemInput {
            description,
            quantity,
            unit_price: price,
        } = item;
        let input = |field: &str, kind: &str, value: &str, extra: &str| {
            let mut cell = Html::trusted("<td><input type=\"");
            cell.push_trusted(kind);
            cell.push_trusted("\" name=\"");
            cell.push_text(&format!("{name}[{index}][{field}]"));
            cell.push_trusted("\" value=\"");
            cell.push_text(value);
            cell.push_trusted("\"");
            cell.push_trusted(extra);
            cell.push_trusted("></td>");
            cell
        };

        let mut tr = Html::trusted("<tr class=\"line-item\">");
        tr.push(input("description", "text", description, ""));
        tr.push(input("quantity", "number", quantity, " min=\"1\" step=\"1\""));
        tr.push(input("unit_price", "number", price, " min=\"0\" step=\"0.01\""));
        tr.push_trusted(
            "<td><button type=\"button\" class=\"btn btn-link remove-row\" \
             aria-label=\"Remove row\">&times;</button></td></tr>",
        );
        tr
    };

    let mut out = Html::trusted("<table class=\"line-items\" id=\"");
    out.push_trusted(&table_id);
    out.push_trusted(
        "\"><thead><tr><th>Description</th><th>Qty</th><th>Unit price</th><th></th></tr>\
         </thead><tbody>",
    );
    for (i, item) in rows.iter().enumerate() {
        out.push(row(&i.to_string(), item));
    }
    if rows.is_empty() {
        out.push(row("0", &blank));
    }
    out.push_trusted("</tbody></table><template id=\"");
    out.push_trusted(&table_id);
    out.push_trusted("-template\">");
    out.push(row("__INDEX__", &blank));
    out.push_trusted("</template><button type=\"button\" class=\"btn btn-secondary add-row\" data-target=\"");
    out.push_trusted(&table_id);
    out.push_trusted("\">Add row</button>");

    out.push(script(&format!(
        "(function(){{var id={id},t=document.getElementById(id),\
         tpl=document.getElementById(id+'-template'),n=t.tBodies[0].rows.length;\
         document.querySelector('[data-target=\"'+id+'\"]').addEventListener('click',function(){{\
         var html=tpl.innerHTML.split('__INDEX__').join(String(n++));\
         t.tBodies[0].insertAdjacentHTML('beforeend',html);}});\
         t.addEventListener('click',function(e){{if(e.target.classList.contains('remove-row')\
         &&t.tBodies[0].rows.length>1){{e.target.closest('tr').remove();}}}});}})();",
        id = js_string(&table_id),
    )));

    out
}

/// Navigation dropdown over `(href, text)` items with a toggle script.
pub fn dropdown(id: &str, label: &str, items: &[(&str, &str)]) -> Html {
    let id = format!("dropdown-{}", field_id(id));
    let menu_id = format!("{id}-menu");

    let mut out = Html::trusted("<div class=\"dropdown\"><button type=\"button\" class=\"dropdown-toggle\" id=\"");
    out.push_trusted(&id);
    out.push_trusted("\" aria-haspopup=\"true\" aria-expanded=\"false\" aria-controls=\"");
    out.push_trusted(&menu_id);
    out.push_trusted("\">");
    out.push_text(label);
    out.push_trusted("</button><ul class=\"dropdown-menu\" id=\"");
    out.push_trusted(&menu_id);
    out.push_trusted("\" hidden>");
    for (href, text) in items {
        out.push_trusted("<li><a href=\"");
        out.push_text(href);
        out.push_trusted("\">");
        out.push_text(text);
        out.push_trusted("</a></li>");
    }
    out.push_trusted("</ul></div>");

    out.push(script(&format!(
        "(function(){{var b=document.getElementById({b}),m=document.getElementById({m});\
         if(!b||!m)return;b.addEventListener('click',function(e){{e.stopPropagation();\
         var open=m.hidden;m.hidden=!open;b.setAttribute('aria-expanded',String(open));}});\
         document.addEventListener('click',function(){{m.hidden=true;\
         b.setAttribute('aria-expanded','false');}});}})();",
        b = js_string(&id),
        m = js_string(&menu_id),
    )));

    out
}
