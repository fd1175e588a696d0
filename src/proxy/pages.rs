//! HTML pages shown instead of the site when access is denied

use crate::error::RentError;
use crate::proxy::inject::escape_html;

/// Denial page for an access error, `None` for any other error
pub fn denial_page(err: &RentError, support_url: Option<&str>) -> Option<String> {
    let (title, message) = match err {
        RentError::UnknownTenant(_) => (
            "Acceso no encontrado",
            "Este enlace de acceso no existe. Revisa el enlace que recibiste.".to_string(),
        ),
        RentError::TenantInactive(_) => (
            "Cuenta desactivada",
            "Tu acceso fue desactivado (deactivated). Contacta a soporte para reactivarlo."
                .to_string(),
        ),
        RentError::RentalExpired { end, .. } => (
            "Renta vencida",
            format!(
                "Tu renta terminó el {} (expired). Renueva para seguir usando el servicio.",
                escape_html(end)
            ),
        ),
        _ => return None,
    };

    Some(render(title, &message, support_url))
}

fn render(title: &str, message: &str, support_url: Option<&str>) -> String {
    let support = support_url
        .map(|url| {
            format!(
                r#"<p><a href="{}" target="_blank" rel="noopener">Contactar soporte</a></p>"#,
                escape_html(url)
            )
        })
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>body{{margin:0;min-height:100vh;display:flex;align-items:center;justify-content:center;background:#f3f4f6;font-family:sans-serif}}main{{max-width:420px;padding:32px;border-radius:8px;background:#fff;text-align:center;box-shadow:0 2px 8px rgba(0,0,0,.1)}}</style>
</head>
<body>
<main>
<h1>{title}</h1>
<p>{message}</p>
{support}
</main>
</body>
</html>"#,
        title = title,
        message = message,
        support = support,
    )
}
