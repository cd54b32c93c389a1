//! Bootstrap user data for worker nodes launched from the stack's launch template.

use crate::error::{self, Result};
use snafu::ResultExt;

const BOUNDARY: &str = "==MYBOUNDARY==";

/// The MIME multi-part document whose single shell-script part joins an instance to
/// `cluster_name`.
pub fn render(cluster_name: &str) -> String {
    format!(
        r#"MIME-Version: 1.0
Content-Type: multipart/mixed; boundary="{boundary}"

--{boundary}
Content-Type: text/x-shellscript; charset="us-ascii"
#!/bin/bash
set -ex
/etc/eks/bootstrap.sh {cluster_name}

--{boundary}--
"#,
        boundary = BOUNDARY,
        cluster_name = cluster_name
    )
}

/// The rendered document, base64 encoded as the launch template API expects.
pub fn encode(cluster_name: &str) -> String {
    base64::encode(render(cluster_name))
}

pub fn decode(user_data: &str) -> Result<String> {
    let bytes = base64::decode(user_data.trim()).context(error::Base64DecodeSnafu)?;
    String::from_utf8(bytes).context(error::Utf8Snafu)
}

#[cfg(test)]
mod test {
    use super::{decode, encode, render};

    const EXPECTED: &str = "MIME-Version: 1.0\n\
Content-Type: multipart/mixed; boundary=\"==MYBOUNDARY==\"\n\
\n\
--==MYBOUNDARY==\n\
Content-Type: text/x-shellscript; charset=\"us-ascii\"\n\
#!/bin/bash\n\
set -ex\n\
/etc/eks/bootstrap.sh eks-1747-0a1b2c3\n\
\n\
--==MYBOUNDARY==--\n";

    #[test]
    fn rendered_document_is_byte_exact() {
        assert_eq!(render("eks-1747-0a1b2c3"), EXPECTED);
    }

    #[test]
    fn encoded_document_decodes_to_the_template() {
        let encoded = encode("eks-1747-0a1b2c3");
        assert!(!encoded.contains('\n'));
        assert_eq!(decode(&encoded).unwrap(), EXPECTED);
    }

    #[test]
    fn only_the_cluster_name_varies() {
        let a = render("a");
        let b = render("bb");
        assert_eq!(a.replace("bootstrap.sh a\n", ""), b.replace("bootstrap.sh bb\n", ""));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode("not base64!").is_err());
        assert!(decode(&base64::encode([0xff, 0xfe])).is_err());
    }
}
